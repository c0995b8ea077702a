//! Units of work executed by jobs.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use jobtrack_core::{JobDescriptor, JobOutcome};

use crate::progress::{NullProgressMonitor, ProgressMonitor};

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: JobDescriptor,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressMonitor>,
}

impl JobContext {
    pub fn new(job: JobDescriptor) -> Self {
        Self {
            job,
            cancel: CancellationToken::new(),
            progress: Arc::new(NullProgressMonitor),
        }
    }

    /// Observe cancellation through `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Report progress to `monitor`.
    pub fn with_progress_monitor(mut self, monitor: Arc<dyn ProgressMonitor>) -> Self {
        self.progress = monitor;
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    /// Opaque serialized job inputs.
    pub fn parameters(&self) -> &str {
        &self.job.parameters
    }

    /// Progress signal for this job.
    pub fn progress(&self) -> &dyn ProgressMonitor {
        self.progress.as_ref()
    }

    /// Whether cancellation was requested. Cancellation is advisory; the
    /// handler decides when to stop.
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute the job body and classify how it ended.
    async fn execute(&self, ctx: JobContext) -> JobOutcome;
}

/// Handler backed by an async closure.
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = JobOutcome> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = JobOutcome> + Send + 'static,
{
    async fn execute(&self, ctx: JobContext) -> JobOutcome {
        (self.f)(ctx).await
    }
}

/// No-op handler for testing.
pub struct NoOpHandler;

#[async_trait]
impl JobHandler for NoOpHandler {
    async fn execute(&self, ctx: JobContext) -> JobOutcome {
        let progress = ctx.progress();
        progress.begin_task("noop", 2);
        progress.worked(1);
        progress.worked(1);
        progress.done();
        JobOutcome::Success(None)
    }
}
