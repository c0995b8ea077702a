//! Integration tests for the tracker driven by a real executor.
//!
//! This suite covers:
//! - Normal completion with progress
//! - Cancellation before start and while running
//! - Deletion of running and finished jobs, in every completion order
//! - Auto-clean, panic capture, and store outages during the lifecycle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobtrack_db::MemoryJobStore;
use jobtrack_jobs::{
    CompletionWaiter, Error, EventBus, ExecutorConfig, FnHandler, JobContext, JobEvent,
    JobExecutor, JobFilter, JobHandler, JobMutation, JobOutcome, JobPage, JobRecord,
    JobRecordStore, JobSpec, JobState, JobTracker, NoOpHandler, Result, UpdateOutcome,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// HELPERS
// ============================================================================

struct Harness {
    bus: EventBus,
    store: MemoryJobStore,
    executor: JobExecutor,
    tracker: Arc<JobTracker>,
}

impl Harness {
    async fn new(config: ExecutorConfig) -> Self {
        let bus = EventBus::default();
        let store = MemoryJobStore::new();
        let executor = JobExecutor::new(config);
        let tracker =
            JobTracker::attach(Arc::new(store.clone()), Arc::new(bus.clone()), &executor).await;
        Self {
            bus,
            store,
            executor,
            tracker,
        }
    }

    async fn default() -> Self {
        Self::new(ExecutorConfig::default()).await
    }

    async fn finish(self) {
        self.executor.drain().await;
        self.tracker.detach().await;
    }
}

/// Handler that reports it started, then blocks until `gate` is cancelled.
/// It ignores the job's own cancellation signal.
struct GatedHandler {
    gate: CancellationToken,
    started: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl JobHandler for GatedHandler {
    async fn execute(&self, _ctx: JobContext) -> JobOutcome {
        let _ = self.started.send(());
        self.gate.cancelled().await;
        JobOutcome::Success(Some("ok".to_string()))
    }
}

fn gated(gate: CancellationToken, started: mpsc::UnboundedSender<()>) -> GatedHandler {
    GatedHandler { gate, started }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn test_normal_completion_with_progress() {
    let h = Harness::default().await;
    let (level_tx, mut level_rx) = mpsc::unbounded_channel::<()>();
    let resume = CancellationToken::new();
    let gate = resume.clone();

    let id = h
        .executor
        .submit(
            JobSpec::new("import", "alice"),
            FnHandler::new(move |ctx: JobContext| {
                let gate = gate.clone();
                let level_tx = level_tx.clone();
                async move {
                    ctx.progress().begin_task("import", 100);
                    ctx.progress().worked(50);
                    let _ = level_tx.send(());
                    gate.cancelled().await;
                    JobOutcome::Success(Some("ok".to_string()))
                }
            }),
        )
        .await
        .unwrap();

    // Record exists as soon as submit returns.
    let record = h.tracker.get(&id).await.unwrap();
    assert_eq!(record.description, "import");
    assert_eq!(record.owner, "alice");

    level_rx.recv().await.unwrap();
    tokio::time::timeout(WAIT, async {
        loop {
            if h.tracker.get(&id).await.unwrap().completion_level == 50 {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("completion level 50 recorded");
    assert_eq!(h.tracker.get(&id).await.unwrap().state, JobState::Running);

    resume.cancel();
    h.executor.drain().await;

    let record = h.tracker.get(&id).await.unwrap();
    assert_eq!(record.state, JobState::Finished);
    assert_eq!(record.completion_level, 100);
    assert_eq!(record.result.as_deref(), Some("ok"));
    assert!(record.schedule_time <= record.start_time.unwrap());
    assert!(record.start_time <= record.finish_time);

    h.finish().await;
}

#[tokio::test]
async fn test_cancel_before_start() {
    let h = Harness::new(ExecutorConfig::default().with_max_concurrent(1)).await;
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let release = CancellationToken::new();

    h.executor
        .submit(JobSpec::new("blocker", "bob"), gated(release.clone(), started_tx))
        .await
        .unwrap();
    started_rx.recv().await.unwrap();

    let mut waiter = CompletionWaiter::subscribe(&h.bus);
    let id = h
        .executor
        .submit(JobSpec::new("queued", "alice"), NoOpHandler)
        .await
        .unwrap();

    assert!(h.tracker.request_cancel(&id).await.unwrap());
    assert_eq!(
        h.tracker.get(&id).await.unwrap().state,
        JobState::CancelRequested
    );

    let state = waiter.wait(&id, WAIT).await.unwrap();
    assert_eq!(state, JobState::Canceled);
    let record = h.tracker.get(&id).await.unwrap();
    assert_eq!(record.state, JobState::Canceled);
    assert!(record.start_time.is_none());

    release.cancel();
    h.finish().await;
}

#[tokio::test]
async fn test_cancel_running_job_is_cooperative_and_idempotent() {
    let h = Harness::default().await;
    let (started_tx, mut started_rx) = mpsc::unbounded_channel::<()>();

    let id = h
        .executor
        .submit(
            JobSpec::new("loop", "alice"),
            FnHandler::new(move |ctx: JobContext| {
                let started_tx = started_tx.clone();
                async move {
                    let _ = started_tx.send(());
                    ctx.cancelled().await;
                    JobOutcome::Canceled(Some("stopped early".to_string()))
                }
            }),
        )
        .await
        .unwrap();
    started_rx.recv().await.unwrap();

    let mut waiter = CompletionWaiter::subscribe(&h.bus);
    assert!(h.tracker.request_cancel(&id).await.unwrap());
    assert!(!h.tracker.request_cancel(&id).await.unwrap());

    assert_eq!(waiter.wait(&id, WAIT).await.unwrap(), JobState::Canceled);
    let record = h.tracker.get(&id).await.unwrap();
    assert_eq!(record.result.as_deref(), Some("stopped early"));

    // Cancel after terminal is a no-op.
    assert!(!h.tracker.request_cancel(&id).await.unwrap());
    assert_eq!(h.tracker.get(&id).await.unwrap().state, JobState::Canceled);

    h.finish().await;
}

#[tokio::test]
async fn test_delete_while_running() {
    let h = Harness::default().await;
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let release = CancellationToken::new();

    let id = h
        .executor
        .submit(JobSpec::new("export", "alice"), gated(release.clone(), started_tx))
        .await
        .unwrap();
    started_rx.recv().await.unwrap();

    let report = h.tracker.request_deletes([id.clone()]).await.unwrap();
    assert_eq!(report.marked, vec![id.clone()]);

    let record = h.store.get(&id).await.unwrap().unwrap();
    assert!(record.deleted);
    assert_eq!(record.state, JobState::Running);
    let page = h.tracker.search(&JobFilter::all(), 0, 10).await.unwrap();
    assert!(page.items.is_empty());

    // The gated body ignores cancellation; it ends when released.
    release.cancel();
    h.executor.drain().await;
    assert!(h.store.get(&id).await.unwrap().is_none());

    h.finish().await;
}

#[tokio::test]
async fn test_delete_already_finished_job() {
    let h = Harness::default().await;
    let id = h
        .executor
        .submit(JobSpec::new("quick", "alice"), NoOpHandler)
        .await
        .unwrap();
    h.executor.drain().await;
    assert_eq!(h.tracker.get(&id).await.unwrap().state, JobState::Finished);

    let mut rx = h.bus.subscribe();
    let report = h.tracker.request_deletes([id.clone()]).await.unwrap();
    assert_eq!(report.removed, vec![id.clone()]);
    assert!(h.store.get(&id).await.unwrap().is_none());

    let envelope = rx.recv().await.unwrap();
    assert_eq!(envelope.payload, JobEvent::removed(id.clone()));

    // Deleting twice is harmless.
    assert!(h.tracker.request_deletes([id]).await.unwrap().is_empty());

    h.finish().await;
}

// ============================================================================
// PROPERTIES
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deletion_converges_under_races() {
    let h = Harness::new(ExecutorConfig::default().with_max_concurrent(8)).await;

    for round in 0..50 {
        let id = h
            .executor
            .submit(
                JobSpec::new(format!("race {round}"), "alice"),
                FnHandler::new(move |_ctx: JobContext| async move {
                    if round % 2 == 0 {
                        tokio::task::yield_now().await;
                    }
                    JobOutcome::Success(None)
                }),
            )
            .await
            .unwrap();

        if round % 3 == 0 {
            tokio::task::yield_now().await;
        }
        h.tracker.request_deletes([id.clone()]).await.unwrap();

        // Never visible once the request returned.
        if let Some(record) = h.store.get(&id).await.unwrap() {
            assert!(record.deleted, "round {round}: record visible after delete");
        }
    }

    h.executor.drain().await;
    assert!(
        h.store.is_empty().await,
        "every deleted record is removed once its task finished"
    );

    h.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completion_level_is_monotonic() {
    let h = Harness::default().await;
    let mut rx = h.bus.subscribe();

    let id = h
        .executor
        .submit(
            JobSpec::new("bulk", "alice"),
            FnHandler::new(|ctx: JobContext| async move {
                ctx.progress().begin_task("bulk", 1_000);
                for _ in 0..1_000 {
                    ctx.progress().worked(1);
                }
                JobOutcome::Success(None)
            }),
        )
        .await
        .unwrap();

    let observer = {
        let store = h.store.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let mut last = 0;
            loop {
                match rx.recv().await {
                    Ok(envelope) if envelope.payload.mentions(&id) => {
                        if let Some(record) = store.get(&id).await.unwrap() {
                            assert!(record.completion_level >= last);
                            last = record.completion_level;
                        }
                        if matches!(envelope.payload, JobEvent::Completed { .. }) {
                            return last;
                        }
                    }
                    Ok(_) => {}
                    Err(_) => return last,
                }
            }
        })
    };

    h.executor.drain().await;
    let last = tokio::time::timeout(WAIT, observer).await.unwrap().unwrap();
    assert_eq!(last, 100);
    assert_eq!(h.tracker.get(&id).await.unwrap().completion_level, 100);

    h.finish().await;
}

#[tokio::test]
async fn test_panic_yields_failed_and_survives_auto_clean() {
    let h = Harness::default().await;
    let id = h
        .executor
        .submit(
            JobSpec::new("explode", "alice").with_auto_clean(true),
            FnHandler::new(|_ctx: JobContext| async move {
                if true {
                    panic!("disk on fire");
                }
                JobOutcome::Success(None)
            }),
        )
        .await
        .unwrap();
    h.executor.drain().await;

    let record = h.tracker.get(&id).await.unwrap();
    assert_eq!(record.state, JobState::Failed);
    assert!(record.result.unwrap().contains("disk on fire"));

    h.finish().await;
}

#[tokio::test]
async fn test_auto_clean_removes_finished_job() {
    let h = Harness::default().await;
    let id = h
        .executor
        .submit(
            JobSpec::new("transient", "alice").with_auto_clean(true),
            NoOpHandler,
        )
        .await
        .unwrap();
    h.executor.drain().await;

    let err = h.tracker.get(&id).await.unwrap_err();
    assert!(matches!(err, Error::JobNotFound(_)));

    h.finish().await;
}

#[tokio::test]
async fn test_delete_finished_for_owner() {
    let h = Harness::default().await;
    let mine = h
        .executor
        .submit(JobSpec::new("a", "alice"), NoOpHandler)
        .await
        .unwrap();
    let theirs = h
        .executor
        .submit(JobSpec::new("b", "bob"), NoOpHandler)
        .await
        .unwrap();
    h.executor.drain().await;

    let report = h.tracker.request_delete_finished(Some("alice")).await.unwrap();
    assert_eq!(report.removed, vec![mine]);
    assert!(h.tracker.get(&theirs).await.is_ok());

    let stats = h.tracker.stats().await.unwrap();
    assert_eq!(stats.finished, 1);
    assert_eq!(stats.total(), 1);

    h.finish().await;
}

#[tokio::test]
async fn test_detach_stops_tracking() {
    let h = Harness::default().await;
    h.tracker.detach().await;

    let id = h
        .executor
        .submit(JobSpec::new("untracked", "alice"), NoOpHandler)
        .await
        .unwrap();
    h.executor.drain().await;
    assert!(h.store.get(&id).await.unwrap().is_none());
}

// ============================================================================
// STORE OUTAGE
// ============================================================================

/// Store wrapper whose writes fail while `down` is set.
struct FlakyStore {
    inner: MemoryJobStore,
    down: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(Error::Internal("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobRecordStore for FlakyStore {
    async fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        self.check()?;
        self.inner.get(id).await
    }

    async fn search(&self, filter: &JobFilter, offset: usize, limit: usize) -> Result<JobPage> {
        self.check()?;
        self.inner.search(filter, offset, limit).await
    }

    async fn put(&self, record: JobRecord) -> Result<()> {
        self.check()?;
        self.inner.put(record).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete(id).await
    }

    async fn update_where(
        &self,
        filter: &JobFilter,
        mutation: &JobMutation,
    ) -> Result<UpdateOutcome> {
        self.check()?;
        self.inner.update_where(filter, mutation).await
    }
}

#[tokio::test]
async fn test_store_outage_is_logged_not_fatal() {
    let store = Arc::new(FlakyStore {
        inner: MemoryJobStore::new(),
        down: AtomicBool::new(false),
    });
    let bus = EventBus::default();
    let executor = JobExecutor::default();
    let tracker = JobTracker::attach(store.clone(), Arc::new(bus.clone()), &executor).await;
    let mut waiter = CompletionWaiter::subscribe(&bus);

    store.down.store(true, Ordering::SeqCst);
    let id = executor
        .submit(JobSpec::new("offline", "alice"), NoOpHandler)
        .await
        .unwrap();

    // The job still completes and announces it.
    assert_eq!(waiter.wait(&id, WAIT).await.unwrap(), JobState::Finished);

    // Caller operations surface the outage.
    assert!(tracker.get(&id).await.is_err());
    assert!(tracker.search(&JobFilter::all(), 0, 10).await.is_err());

    store.down.store(false, Ordering::SeqCst);
    assert!(matches!(
        tracker.get(&id).await.unwrap_err(),
        Error::JobNotFound(_)
    ));

    executor.drain().await;
    tracker.detach().await;
}
