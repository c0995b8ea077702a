//! In-process job record store.
//!
//! Records live in a map behind a `tokio::sync::RwLock`. A conditional update
//! holds the write lock while it applies the mutation to every matching
//! record, which linearizes all writers for a given id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use jobtrack_core::{
    JobFilter, JobMutation, JobPage, JobRecord, JobRecordStore, Result, UpdateOutcome,
};

/// Search order: newest schedule time first, id as tie-breaker.
pub(crate) fn search_order(a: &JobRecord, b: &JobRecord) -> std::cmp::Ordering {
    b.schedule_time
        .cmp(&a.schedule_time)
        .then_with(|| a.id.cmp(&b.id))
}

/// `JobRecordStore` backed by a shared in-memory map.
///
/// Cloning is cheap; clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    records: Arc<RwLock<HashMap<String, JobRecord>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, deleted ones included.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl JobRecordStore for MemoryJobStore {
    async fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn search(&self, filter: &JobFilter, offset: usize, limit: usize) -> Result<JobPage> {
        if filter.is_unsatisfiable() {
            return Ok(JobPage::empty(offset, limit));
        }

        let mut matching: Vec<JobRecord> = {
            let records = self.records.read().await;
            records
                .values()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect()
        };
        matching.sort_by(search_order);

        let total = matching.len();
        let items: Vec<JobRecord> = matching.into_iter().skip(offset).take(limit).collect();
        trace!(
            subsystem = "store",
            component = "memory_store",
            op = "search",
            result_count = items.len(),
            total,
            "Searched job records"
        );

        Ok(JobPage {
            items,
            offset,
            limit,
            total,
        })
    }

    async fn put(&self, record: JobRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.records.write().await.remove(id).is_some();
        debug!(
            subsystem = "store",
            component = "memory_store",
            op = "delete",
            job_id = id,
            removed,
            "Deleted job record"
        );
        Ok(removed)
    }

    async fn update_where(
        &self,
        filter: &JobFilter,
        mutation: &JobMutation,
    ) -> Result<UpdateOutcome> {
        let mut outcome = UpdateOutcome::default();
        if filter.is_unsatisfiable() {
            return Ok(outcome);
        }

        let mut records = self.records.write().await;
        for record in records.values_mut().filter(|r| filter.matches(r)) {
            if let Some(next) = mutation.apply(record) {
                *record = next;
                outcome.changed.push(record.id.clone());
            }
            outcome.records.push(record.clone());
        }
        drop(records);

        outcome.records.sort_by(search_order);
        debug!(
            subsystem = "store",
            component = "memory_store",
            op = "update_where",
            mutation = mutation.name(),
            matched = outcome.records.len(),
            changed = outcome.changed.len(),
            "Applied conditional update"
        );
        Ok(outcome)
    }
}
