//! Selection of in-flight tasks by job id.

use std::collections::BTreeSet;

/// Predicate selecting a subset of the executor's in-flight tasks.
pub trait JobFamily: Send + Sync {
    fn belongs_to(&self, job_id: &str) -> bool;

    /// The exact member ids, when the family is a finite set.
    fn job_ids(&self) -> Option<Vec<&str>> {
        None
    }
}

/// Tasks whose job id is in a fixed set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobIdFamily {
    ids: BTreeSet<String>,
}

impl JobIdFamily {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn single(id: impl Into<String>) -> Self {
        Self::new([id.into()])
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl JobFamily for JobIdFamily {
    fn belongs_to(&self, job_id: &str) -> bool {
        self.ids.contains(job_id)
    }

    fn job_ids(&self) -> Option<Vec<&str>> {
        Some(self.ids.iter().map(String::as_str).collect())
    }
}

/// Every task.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyJob;

impl JobFamily for AnyJob {
    fn belongs_to(&self, _job_id: &str) -> bool {
        true
    }
}
