//! Task view for a process that does not run the jobs it manages.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use jobtrack_jobs::{
    defaults::INTERNAL_FETCH_LIMIT, JobFamily, JobFilter, JobRecordStore, JobState, TaskControl,
};

/// Treats every non-terminal record in the store as an in-flight task.
///
/// The executing process owns the cancellation tokens, so `cancel` signals
/// nothing here. Deletes of active jobs take the marking path and the
/// tracker in the executing process removes the record when the job ends.
pub struct StoredTasks {
    store: Arc<dyn JobRecordStore>,
}

impl StoredTasks {
    pub fn new(store: Arc<dyn JobRecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskControl for StoredTasks {
    async fn find_in_flight(&self, family: &dyn JobFamily) -> Vec<String> {
        let active = JobState::ALL.into_iter().filter(|s| !s.is_terminal());
        let mut filter = JobFilter::all().with_states(active);
        if let Some(ids) = family.job_ids() {
            filter = filter.with_ids(ids.iter().map(|id| id.to_string()));
        }

        let mut found = Vec::new();
        let mut offset = 0;
        loop {
            let page = match self.store.search(&filter, offset, INTERNAL_FETCH_LIMIT).await {
                Ok(page) => page,
                Err(e) => {
                    // Marking is the safe path; the mark itself reports the outage.
                    warn!(
                        subsystem = "cli",
                        component = "stored_tasks",
                        error = %e,
                        "Failed to look up active jobs"
                    );
                    return family
                        .job_ids()
                        .map(|ids| ids.into_iter().map(str::to_string).collect())
                        .unwrap_or_default();
                }
            };
            let fetched = page.items.len();
            offset += fetched;
            found.extend(
                page.items
                    .into_iter()
                    .map(|r| r.id)
                    .filter(|id| family.belongs_to(id)),
            );
            if fetched == 0 || offset >= page.total {
                return found;
            }
        }
    }

    async fn cancel(&self, _family: &dyn JobFamily) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobtrack_db::MemoryJobStore;
    use jobtrack_jobs::{AnyJob, JobDescriptor, JobIdFamily, JobRecord};

    async fn put(store: &MemoryJobStore, id: &str, state: JobState) {
        let mut record = JobRecord::scheduled(
            &JobDescriptor {
                id: id.to_string(),
                description: "d".to_string(),
                owner: "alice".to_string(),
                parameters: String::new(),
                auto_clean: false,
            },
            chrono::Utc::now(),
        );
        record.state = state;
        store.put(record).await.unwrap();
    }

    #[tokio::test]
    async fn test_active_records_are_in_flight() {
        let store = MemoryJobStore::new();
        put(&store, "queued", JobState::Scheduled).await;
        put(&store, "running", JobState::Running).await;
        put(&store, "stopping", JobState::CancelRequested).await;
        put(&store, "done", JobState::Finished).await;
        let tasks = StoredTasks::new(Arc::new(store));

        let mut all = tasks.find_in_flight(&AnyJob).await;
        all.sort();
        assert_eq!(all, vec!["queued", "running", "stopping"]);

        let some = tasks
            .find_in_flight(&JobIdFamily::new(["running", "done", "ghost"]))
            .await;
        assert_eq!(some, vec!["running"]);
        assert_eq!(tasks.cancel(&AnyJob).await, 0);
    }
}
