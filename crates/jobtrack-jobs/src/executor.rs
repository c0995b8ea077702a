//! Bounded executor running job bodies and reporting their lifecycle.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use jobtrack_core::{Error, JobDescriptor, JobListener, JobOutcome, Result};

use crate::family::JobFamily;
use crate::handler::{JobContext, JobHandler};
use crate::progress::{CompletionLevelMonitor, ProgressMonitor};

/// Configuration for the job executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of job bodies running at once.
    pub max_concurrent_jobs: usize,
    /// Whether the executor accepts submissions.
    pub enabled: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: jobtrack_core::defaults::JOB_MAX_CONCURRENT,
            enabled: true,
        }
    }
}

impl ExecutorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_EXECUTOR_ENABLED` | `true` | Accept job submissions |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrently running jobs |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_EXECUTOR_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(jobtrack_core::defaults::JOB_MAX_CONCURRENT)
            .max(1);

        Self {
            max_concurrent_jobs,
            enabled,
        }
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Enable or disable submissions.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// What a caller submits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSpec {
    pub description: String,
    pub owner: String,
    /// Opaque serialized inputs, stored with the record.
    pub parameters: String,
    /// Remove the record once the job finishes or is canceled.
    pub auto_clean: bool,
}

impl JobSpec {
    pub fn new(description: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            owner: owner.into(),
            ..Self::default()
        }
    }

    pub fn with_parameters(mut self, parameters: impl Into<String>) -> Self {
        self.parameters = parameters.into();
        self
    }

    pub fn with_auto_clean(mut self, auto_clean: bool) -> Self {
        self.auto_clean = auto_clean;
        self
    }
}

/// Read and signal access to in-flight tasks.
#[async_trait]
pub trait TaskControl: Send + Sync {
    /// Ids of the in-flight tasks (queued or running) in `family`.
    async fn find_in_flight(&self, family: &dyn JobFamily) -> Vec<String>;

    /// Signal cancellation to the in-flight tasks in `family`. Returns how
    /// many were signalled.
    async fn cancel(&self, family: &dyn JobFamily) -> usize;
}

/// Handle returned by [`JobExecutor::add_listener`].
pub type ListenerId = u64;

type ListenerList = Vec<(ListenerId, Arc<dyn JobListener>)>;

struct ExecutorInner {
    config: ExecutorConfig,
    permits: Arc<Semaphore>,
    in_flight: RwLock<HashMap<String, CancellationToken>>,
    listeners: RwLock<ListenerList>,
    next_listener_id: AtomicU64,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl ExecutorInner {
    async fn listeners(&self) -> Vec<Arc<dyn JobListener>> {
        self.listeners
            .read()
            .await
            .iter()
            .map(|(_, l)| l.clone())
            .collect()
    }
}

/// Runs submitted jobs on tokio tasks, at most `max_concurrent_jobs` at once,
/// and notifies registered listeners of each job's lifecycle.
///
/// For one job the callbacks arrive in order: `scheduled` (before `submit`
/// returns), `running`, `progress`*, `done`. A job is removed from the
/// in-flight registry before `done` is delivered.
#[derive(Clone)]
pub struct JobExecutor {
    inner: Arc<ExecutorInner>,
}

impl JobExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            inner: Arc::new(ExecutorInner {
                config,
                permits,
                in_flight: RwLock::new(HashMap::new()),
                listeners: RwLock::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Register a lifecycle listener.
    pub async fn add_listener(&self, listener: Arc<dyn JobListener>) -> ListenerId {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().await.push((id, listener));
        debug!(
            subsystem = "executor",
            listener_id = id,
            "Registered job listener"
        );
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Submit a job. The `scheduled` callback has completed when this returns.
    pub async fn submit<H>(&self, spec: JobSpec, handler: H) -> Result<String>
    where
        H: JobHandler + 'static,
    {
        self.submit_shared(spec, Arc::new(handler)).await
    }

    /// Submit a job with a shared handler.
    pub async fn submit_shared(
        &self,
        spec: JobSpec,
        handler: Arc<dyn JobHandler>,
    ) -> Result<String> {
        if !self.inner.config.enabled {
            return Err(Error::Executor("job executor is disabled".to_string()));
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::Executor("job executor is shut down".to_string()));
        }

        let descriptor = JobDescriptor {
            id: Uuid::new_v4().to_string(),
            description: spec.description,
            owner: spec.owner,
            parameters: spec.parameters,
            auto_clean: spec.auto_clean,
        };
        let cancel = self.inner.shutdown.child_token();
        self.inner
            .in_flight
            .write()
            .await
            .insert(descriptor.id.clone(), cancel.clone());

        debug!(
            subsystem = "executor",
            op = "submit",
            job_id = %descriptor.id,
            owner = %descriptor.owner,
            "Job submitted"
        );

        for listener in self.inner.listeners().await {
            listener.scheduled(&descriptor).await;
        }

        let job_id = descriptor.id.clone();
        let inner = self.inner.clone();
        self.inner
            .tasks
            .spawn(run_job(inner, descriptor, handler, cancel));
        Ok(job_id)
    }

    /// Number of jobs queued or running.
    pub async fn in_flight_count(&self) -> usize {
        self.inner.in_flight.read().await.len()
    }

    /// Wait until every job submitted so far has reported done, without
    /// cancelling anything. The executor keeps accepting submissions.
    pub async fn drain(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    /// Cancel every in-flight job and wait until all of them reported done.
    pub async fn shutdown(&self) {
        let pending = self.in_flight_count().await;
        info!(
            subsystem = "executor",
            op = "shutdown",
            in_flight = pending,
            "Job executor shutting down"
        );
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        info!(subsystem = "executor", "Job executor stopped");
    }
}

impl Default for JobExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

#[async_trait]
impl TaskControl for JobExecutor {
    async fn find_in_flight(&self, family: &dyn JobFamily) -> Vec<String> {
        self.inner
            .in_flight
            .read()
            .await
            .keys()
            .filter(|id| family.belongs_to(id))
            .cloned()
            .collect()
    }

    async fn cancel(&self, family: &dyn JobFamily) -> usize {
        let in_flight = self.inner.in_flight.read().await;
        let mut signalled = 0;
        for (id, token) in in_flight.iter().filter(|(id, _)| family.belongs_to(id)) {
            token.cancel();
            signalled += 1;
            debug!(subsystem = "executor", op = "cancel", job_id = %id, "Cancellation signalled");
        }
        signalled
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("job panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("job panicked: {s}")
    } else {
        "job panicked".to_string()
    }
}

/// Body of the task spawned for one job.
async fn run_job(
    inner: Arc<ExecutorInner>,
    descriptor: JobDescriptor,
    handler: Arc<dyn JobHandler>,
    cancel: CancellationToken,
) {
    let start = Instant::now();
    let job_id = descriptor.id.clone();

    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = inner.permits.clone().acquire_owned() => permit.ok(),
    };

    let outcome = match permit {
        Some(_permit) if !cancel.is_cancelled() => {
            info!(subsystem = "executor", job_id = %job_id, "Processing job");
            for listener in inner.listeners().await {
                listener.running(&descriptor).await;
            }
            execute_with_progress(&inner, &descriptor, handler, cancel).await
        }
        _ => {
            debug!(
                subsystem = "executor",
                job_id = %job_id,
                "Job canceled before start"
            );
            JobOutcome::Canceled(None)
        }
    };

    inner.in_flight.write().await.remove(&job_id);

    let duration_ms = start.elapsed().as_millis() as u64;
    match &outcome {
        JobOutcome::Failed(error) => warn!(
            subsystem = "executor",
            job_id = %job_id,
            %error,
            duration_ms,
            "Job failed"
        ),
        other => info!(
            subsystem = "executor",
            job_id = %job_id,
            state = %other.terminal_state(),
            duration_ms,
            "Job completed"
        ),
    }

    for listener in inner.listeners().await {
        listener.done(&descriptor, &outcome).await;
    }
}

/// Run the handler while forwarding its completion levels to listeners in
/// order. Every level has been delivered when this returns.
async fn execute_with_progress(
    inner: &ExecutorInner,
    descriptor: &JobDescriptor,
    handler: Arc<dyn JobHandler>,
    cancel: CancellationToken,
) -> JobOutcome {
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<u8>();
    // The handler may keep its context alive past its return, so the sender
    // is taken out explicitly instead of relying on the monitor being dropped.
    let sender = Arc::new(Mutex::new(Some(progress_tx)));
    let callback_sender = sender.clone();
    let monitor = Arc::new(
        CompletionLevelMonitor::new(move |level| {
            let guard = callback_sender.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(level);
            }
        })
        .with_cancellation(cancel.clone()),
    );
    let ctx = JobContext::new(descriptor.clone())
        .with_cancellation(cancel)
        .with_progress_monitor(monitor.clone());

    let body = async move {
        let outcome = match AssertUnwindSafe(handler.execute(ctx)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => JobOutcome::Failed(panic_message(payload)),
        };
        if matches!(outcome, JobOutcome::Success(_)) {
            monitor.done();
        }
        // Closes the progress channel; later reports are discarded.
        sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        outcome
    };

    let forward = async {
        while let Some(level) = progress_rx.recv().await {
            for listener in inner.listeners().await {
                listener.progress(descriptor, level).await;
            }
        }
    };

    let (outcome, ()) = tokio::join!(body, forward);
    outcome
}
