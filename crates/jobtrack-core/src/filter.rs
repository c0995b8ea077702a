//! Record selection shared by search and conditional updates.
//!
//! A [`JobFilter`] is a conjunction of optional criteria. An unset criterion
//! matches everything; an empty id or state set matches nothing.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::{JobRecord, JobState};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Restrict to these job ids.
    pub ids: Option<BTreeSet<String>>,
    /// Restrict to records requested by this principal.
    pub owner: Option<String>,
    /// Restrict to records in one of these states.
    pub states: Option<Vec<JobState>>,
    /// Case-insensitive substring match on the description.
    pub description: Option<String>,
    /// Restrict on the logical deletion flag.
    pub deleted: Option<bool>,
}

impl JobFilter {
    /// Filter matching every record, deleted or not.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter matching exactly one id.
    pub fn by_id(id: impl Into<String>) -> Self {
        Self::default().with_ids([id.into()])
    }

    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_states<I>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = JobState>,
    {
        let mut states: Vec<JobState> = states.into_iter().collect();
        states.dedup();
        self.states = Some(states);
        self
    }

    pub fn with_description(mut self, term: impl Into<String>) -> Self {
        self.description = Some(term.into());
        self
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = Some(deleted);
        self
    }

    /// Only records a caller is allowed to see.
    pub fn visible(self) -> Self {
        self.with_deleted(false)
    }

    /// Records in a terminal state.
    pub fn done(self) -> Self {
        self.with_states(JobState::TERMINAL)
    }

    pub fn matches(&self, record: &JobRecord) -> bool {
        if let Some(ref ids) = self.ids {
            if !ids.contains(&record.id) {
                return false;
            }
        }
        if let Some(ref owner) = self.owner {
            if &record.owner != owner {
                return false;
            }
        }
        if let Some(ref states) = self.states {
            if !states.contains(&record.state) {
                return false;
            }
        }
        if let Some(ref term) = self.description {
            if !record
                .description
                .to_lowercase()
                .contains(&term.to_lowercase())
            {
                return false;
            }
        }
        if let Some(deleted) = self.deleted {
            if record.deleted != deleted {
                return false;
            }
        }
        true
    }

    /// True when the filter can never match anything.
    pub fn is_unsatisfiable(&self) -> bool {
        self.ids.as_ref().is_some_and(|ids| ids.is_empty())
            || self.states.as_ref().is_some_and(|s| s.is_empty())
    }
}
