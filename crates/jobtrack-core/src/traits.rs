//! Core traits for jobtrack abstractions.
//!
//! These traits define the seams between the tracker and its collaborators
//! (record persistence, notification transport, execution facility), enabling
//! pluggable backends and testability.

use async_trait::async_trait;

use crate::error::Result;
use crate::events::JobEvent;
use crate::filter::JobFilter;
use crate::models::{JobDescriptor, JobOutcome, JobPage, JobRecord};
use crate::mutation::JobMutation;

// =============================================================================
// RECORD STORE
// =============================================================================

/// Records touched by a conditional bulk update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Every matching record, as stored after the update.
    pub records: Vec<JobRecord>,
    /// Ids of the records the mutation actually changed.
    pub changed: Vec<String>,
}

impl UpdateOutcome {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&JobRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn was_changed(&self, id: &str) -> bool {
        self.changed.iter().any(|c| c == id)
    }
}

/// Persistence primitives over job records.
#[async_trait]
pub trait JobRecordStore: Send + Sync {
    /// Fetch one record, deleted or not.
    async fn get(&self, id: &str) -> Result<Option<JobRecord>>;

    /// One page of records matching `filter`, newest schedule time first.
    async fn search(&self, filter: &JobFilter, offset: usize, limit: usize) -> Result<JobPage>;

    /// Insert or replace the record stored under `record.id`.
    async fn put(&self, record: JobRecord) -> Result<()>;

    /// Physically remove a record. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Atomically apply `mutation` to every record matching `filter`.
    ///
    /// The mutation sees the current stored record; no other writer can
    /// interleave between that read and the write of its result.
    async fn update_where(&self, filter: &JobFilter, mutation: &JobMutation)
        -> Result<UpdateOutcome>;
}

// =============================================================================
// NOTIFICATION BUS
// =============================================================================

/// Publish side of a publish/subscribe transport.
#[async_trait]
pub trait NotificationBus: Send + Sync {
    async fn publish(&self, address: &str, event: JobEvent) -> Result<()>;
}

// =============================================================================
// LIFECYCLE LISTENER
// =============================================================================

/// Observer of the execution facility's per-job lifecycle.
///
/// For a given job the callbacks arrive in order: `scheduled`, `running`,
/// any number of `progress`, then `done`. `running` is skipped when the job
/// is canceled before it starts. Callbacks for different jobs run concurrently.
#[async_trait]
pub trait JobListener: Send + Sync {
    async fn scheduled(&self, job: &JobDescriptor);

    async fn running(&self, job: &JobDescriptor);

    async fn progress(&self, _job: &JobDescriptor, _completion_level: u8) {}

    async fn done(&self, job: &JobDescriptor, outcome: &JobOutcome);
}

/// Listener that ignores every callback.
pub struct NoOpListener;

#[async_trait]
impl JobListener for NoOpListener {
    async fn scheduled(&self, _job: &JobDescriptor) {}
    async fn running(&self, _job: &JobDescriptor) {}
    async fn done(&self, _job: &JobDescriptor, _outcome: &JobOutcome) {}
}
