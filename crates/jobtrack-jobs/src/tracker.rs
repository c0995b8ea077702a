//! Job tracker: persists the executor's lifecycle callbacks as job records
//! and serves caller reads, cancellation and deletion requests.
//!
//! ## Deletion
//!
//! A record is physically removed only once it is both done and deleted.
//! Whichever side observes the second of those two facts removes it:
//!
//! - `request_deletes` removes records with no in-flight task right away;
//!   for in-flight tasks it sets `deleted` and signals cancellation. If the
//!   mark lands on a record that is already terminal, it removes it.
//! - `on_done` moves the record to its terminal state. If the record is
//!   already marked deleted, it removes it.
//!
//! Both steps are conditional updates scoped to the id, so the store orders
//! them and exactly one side performs the removal.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use jobtrack_core::defaults::{INTERNAL_FETCH_LIMIT, PAGE_LIMIT_MAX};
use jobtrack_core::{
    Error, JobDescriptor, JobFilter, JobListener, JobMutation, JobOutcome, JobPage, JobRecord,
    JobRecordStore, JobState, JobStats, NotificationBus, Result,
};

use crate::executor::{JobExecutor, ListenerId, TaskControl};
use crate::family::JobIdFamily;
use crate::publisher::NotificationPublisher;

/// What `request_deletes` did with each requested id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Records physically removed.
    pub removed: Vec<String>,
    /// Records marked deleted whose tasks are still winding down.
    pub marked: Vec<String>,
}

impl DeleteReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.marked.is_empty()
    }
}

pub struct JobTracker {
    store: Arc<dyn JobRecordStore>,
    publisher: NotificationPublisher,
    tasks: Arc<dyn TaskControl>,
    registration: Mutex<Option<(JobExecutor, ListenerId)>>,
}

impl JobTracker {
    /// A tracker not yet registered with any executor.
    pub fn new(
        store: Arc<dyn JobRecordStore>,
        bus: Arc<dyn NotificationBus>,
        tasks: Arc<dyn TaskControl>,
    ) -> Self {
        Self {
            store,
            publisher: NotificationPublisher::new(bus),
            tasks,
            registration: Mutex::new(None),
        }
    }

    /// Create a tracker and register it as a listener of `executor`.
    pub async fn attach(
        store: Arc<dyn JobRecordStore>,
        bus: Arc<dyn NotificationBus>,
        executor: &JobExecutor,
    ) -> Arc<Self> {
        let tracker = Arc::new(Self::new(store, bus, Arc::new(executor.clone())));
        let id = executor.add_listener(tracker.clone()).await;
        *tracker.registration.lock().await = Some((executor.clone(), id));
        info!(subsystem = "tracker", listener_id = id, "Job tracker attached");
        tracker
    }

    /// Stop receiving lifecycle callbacks. Idempotent.
    pub async fn detach(&self) {
        if let Some((executor, id)) = self.registration.lock().await.take() {
            executor.remove_listener(id).await;
            info!(subsystem = "tracker", listener_id = id, "Job tracker detached");
        }
    }

    // ---------------------------------------------------------------------
    // Caller operations
    // ---------------------------------------------------------------------

    /// Non-deleted records matching `filter`, newest first.
    pub async fn search(&self, filter: &JobFilter, offset: usize, limit: usize) -> Result<JobPage> {
        let filter = filter.clone().visible();
        let limit = limit.min(PAGE_LIMIT_MAX);
        self.store.search(&filter, offset, limit).await
    }

    /// Fetch one record, including one already marked deleted.
    pub async fn get(&self, id: &str) -> Result<JobRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    /// Ask the job to stop. Returns whether a cancellation was newly
    /// requested; a job already cancel-requested or done is left alone.
    pub async fn request_cancel(&self, id: &str) -> Result<bool> {
        let record = self.get(id).await?;
        if !record.state.is_cancelable() {
            debug!(
                subsystem = "tracker",
                op = "request_cancel",
                job_id = id,
                state = %record.state,
                "Cancellation not applicable"
            );
            return Ok(false);
        }

        let outcome = self
            .store
            .update_where(&JobFilter::by_id(id), &JobMutation::RequestCancel)
            .await?;
        if !outcome.was_changed(id) {
            return Ok(false);
        }

        self.publisher.changed(id).await;
        let signalled = self.tasks.cancel(&JobIdFamily::single(id)).await;
        info!(
            subsystem = "tracker",
            op = "request_cancel",
            job_id = id,
            signalled,
            "Cancellation requested"
        );
        Ok(true)
    }

    /// Delete the given jobs. Jobs without an in-flight task are removed now;
    /// the others are hidden, signalled to cancel, and removed when done.
    pub async fn request_deletes<I, S>(&self, ids: I) -> Result<DeleteReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let start = Instant::now();
        let ids: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        let mut report = DeleteReport::default();
        if ids.is_empty() {
            return Ok(report);
        }

        let in_flight: BTreeSet<String> = self
            .tasks
            .find_in_flight(&JobIdFamily::new(ids.iter().cloned()))
            .await
            .into_iter()
            .collect();

        for id in ids.difference(&in_flight) {
            if self.store.delete(id).await? {
                self.publisher.removed(id).await;
                report.removed.push(id.clone());
            }
        }

        if !in_flight.is_empty() {
            let outcome = self
                .store
                .update_where(
                    &JobFilter::all().with_ids(in_flight.iter().cloned()),
                    &JobMutation::MarkDeleted,
                )
                .await?;

            for record in &outcome.records {
                if record.is_done() {
                    // Finished before the mark landed; on_done saw deleted=false.
                    if self.store.delete(&record.id).await? {
                        self.publisher.removed(&record.id).await;
                        report.removed.push(record.id.clone());
                    }
                } else if outcome.was_changed(&record.id) {
                    self.publisher.changed(&record.id).await;
                    report.marked.push(record.id.clone());
                }
            }

            if !report.marked.is_empty() {
                self.tasks
                    .cancel(&JobIdFamily::new(report.marked.iter().cloned()))
                    .await;
            }
        }

        info!(
            subsystem = "tracker",
            op = "request_deletes",
            requested = ids.len(),
            removed = report.removed.len(),
            marked = report.marked.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Job deletion requested"
        );
        Ok(report)
    }

    /// Delete every visible job in a terminal state, optionally only those
    /// of `owner`.
    pub async fn request_delete_finished(&self, owner: Option<&str>) -> Result<DeleteReport> {
        let mut filter = JobFilter::all().visible().done();
        if let Some(owner) = owner {
            filter = filter.with_owner(owner);
        }
        let ids: Vec<String> = self
            .collect_all(&filter)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        self.request_deletes(ids).await
    }

    /// Count of visible records per state.
    pub async fn stats(&self) -> Result<JobStats> {
        let mut stats = JobStats::default();
        for record in self.collect_all(&JobFilter::all().visible()).await? {
            stats.record(record.state);
        }
        Ok(stats)
    }

    async fn collect_all(&self, filter: &JobFilter) -> Result<Vec<JobRecord>> {
        let mut records = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .store
                .search(filter, offset, INTERNAL_FETCH_LIMIT)
                .await?;
            let fetched = page.items.len();
            records.extend(page.items);
            offset += fetched;
            if fetched == 0 || offset >= page.total {
                return Ok(records);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle handlers
    // ---------------------------------------------------------------------

    pub async fn on_scheduled(&self, job: &JobDescriptor) {
        let record = JobRecord::scheduled(job, Utc::now());
        match self.store.put(record).await {
            Ok(()) => {
                debug!(subsystem = "tracker", op = "on_scheduled", job_id = %job.id, "Job scheduled");
                self.publisher.added(&job.id).await;
            }
            Err(e) => error!(
                subsystem = "tracker",
                op = "on_scheduled",
                job_id = %job.id,
                error = %e,
                "Failed to create job record"
            ),
        }
    }

    pub async fn on_running(&self, job: &JobDescriptor) {
        let mutation = JobMutation::SetRunning { at: Utc::now() };
        self.apply_and_notify(job, "on_running", &mutation).await;
    }

    pub async fn on_progress(&self, job: &JobDescriptor, completion_level: u8) {
        let mutation = JobMutation::SetCompletionLevel {
            level: completion_level,
        };
        self.apply_and_notify(job, "on_progress", &mutation).await;
    }

    pub async fn on_done(&self, job: &JobDescriptor, outcome: &JobOutcome) {
        let state = outcome.terminal_state();
        let mutation = JobMutation::SetDone {
            state,
            at: Utc::now(),
            result: outcome.payload().map(str::to_string),
        };

        match self.store.update_where(&JobFilter::by_id(&job.id), &mutation).await {
            Ok(updated) => match updated.get(&job.id) {
                Some(record) => {
                    if !updated.was_changed(&job.id) && record.state != state {
                        let rejected = Error::InvalidTransition {
                            from: record.state,
                            to: state,
                        };
                        warn!(
                            subsystem = "tracker",
                            op = "on_done",
                            job_id = %job.id,
                            error = %rejected,
                            "Ignoring completion of a finished job"
                        );
                    }
                    let auto_clean = job.auto_clean
                        && matches!(record.state, JobState::Finished | JobState::Canceled);
                    if record.deleted || auto_clean {
                        self.remove(&job.id, "on_done").await;
                    } else if updated.was_changed(&job.id) {
                        self.publisher.changed(&job.id).await;
                    }
                }
                None => debug!(
                    subsystem = "tracker",
                    op = "on_done",
                    job_id = %job.id,
                    "Record already gone"
                ),
            },
            Err(e) => error!(
                subsystem = "tracker",
                op = "on_done",
                job_id = %job.id,
                error = %e,
                "Failed to record job completion"
            ),
        }

        self.publisher.completed(&job.id, state).await;
    }

    async fn apply_and_notify(&self, job: &JobDescriptor, op: &'static str, mutation: &JobMutation) {
        match self.store.update_where(&JobFilter::by_id(&job.id), mutation).await {
            Ok(updated) if updated.was_changed(&job.id) => {
                debug!(
                    subsystem = "tracker",
                    op,
                    job_id = %job.id,
                    mutation = mutation.name(),
                    "Job record updated"
                );
                self.publisher.changed(&job.id).await;
            }
            Ok(_) => {}
            Err(e) => error!(
                subsystem = "tracker",
                op,
                job_id = %job.id,
                mutation = mutation.name(),
                error = %e,
                "Failed to update job record"
            ),
        }
    }

    async fn remove(&self, id: &str, op: &'static str) {
        match self.store.delete(id).await {
            Ok(true) => {
                debug!(subsystem = "tracker", op, job_id = id, "Job record removed");
                self.publisher.removed(id).await;
            }
            Ok(false) => {}
            Err(e) => error!(
                subsystem = "tracker",
                op,
                job_id = id,
                error = %e,
                "Failed to remove job record"
            ),
        }
    }
}

#[async_trait]
impl JobListener for JobTracker {
    async fn scheduled(&self, job: &JobDescriptor) {
        self.on_scheduled(job).await;
    }

    async fn running(&self, job: &JobDescriptor) {
        self.on_running(job).await;
    }

    async fn progress(&self, job: &JobDescriptor, completion_level: u8) {
        self.on_progress(job, completion_level).await;
    }

    async fn done(&self, job: &JobDescriptor, outcome: &JobOutcome) {
        self.on_done(job, outcome).await;
    }
}
