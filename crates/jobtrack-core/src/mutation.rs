//! Named conditional mutations applied by a store's conditional bulk update.
//!
//! Each mutation is a pure function from the current record to the next one.
//! [`JobMutation::apply`] returns `None` when the guard does not hold, in which
//! case the store leaves the record untouched. Stores apply a mutation to every
//! matching record atomically, so the guard always sees the latest state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{JobRecord, JobState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JobMutation {
    /// `deleted = true`.
    MarkDeleted,
    /// Compare-and-swap on `state`.
    SetStateIf { expected: JobState, new: JobState },
    /// `state = CANCEL_REQUESTED` while the job is scheduled or running.
    RequestCancel,
    /// Raise `completion_level`; lower values are ignored.
    SetCompletionLevel { level: u8 },
    /// `state = RUNNING, start_time = at`.
    SetRunning { at: DateTime<Utc> },
    /// `state = <terminal>, finish_time = at, result = ...`.
    SetDone {
        state: JobState,
        at: DateTime<Utc>,
        result: Option<String>,
    },
}

impl JobMutation {
    pub fn name(&self) -> &'static str {
        match self {
            JobMutation::MarkDeleted => "mark_deleted",
            JobMutation::SetStateIf { .. } => "set_state_if",
            JobMutation::RequestCancel => "request_cancel",
            JobMutation::SetCompletionLevel { .. } => "set_completion_level",
            JobMutation::SetRunning { .. } => "set_running",
            JobMutation::SetDone { .. } => "set_done",
        }
    }

    /// Compute the next record, or `None` if nothing changes.
    pub fn apply(&self, current: &JobRecord) -> Option<JobRecord> {
        match self {
            JobMutation::MarkDeleted => {
                if current.deleted {
                    return None;
                }
                let mut next = current.clone();
                next.deleted = true;
                Some(next)
            }
            JobMutation::SetStateIf { expected, new } => {
                if current.state != *expected || !expected.can_transition_to(*new) {
                    return None;
                }
                let mut next = current.clone();
                next.state = *new;
                Some(next)
            }
            JobMutation::RequestCancel => {
                if !current.state.is_cancelable() {
                    return None;
                }
                let mut next = current.clone();
                next.state = JobState::CancelRequested;
                Some(next)
            }
            JobMutation::SetCompletionLevel { level } => {
                let level = (*level).min(100);
                if current.is_done() || level <= current.completion_level {
                    return None;
                }
                let mut next = current.clone();
                next.completion_level = level;
                Some(next)
            }
            JobMutation::SetRunning { at } => {
                if current.start_time.is_some() {
                    return None;
                }
                let start = (*at).max(current.schedule_time);
                match current.state {
                    JobState::Scheduled => {
                        let mut next = current.clone();
                        next.state = JobState::Running;
                        next.start_time = Some(start);
                        Some(next)
                    }
                    // A pending cancellation request outlives the start.
                    JobState::CancelRequested => {
                        let mut next = current.clone();
                        next.start_time = Some(start);
                        Some(next)
                    }
                    _ => None,
                }
            }
            JobMutation::SetDone { state, at, result } => {
                if !state.is_terminal() || current.is_done() {
                    return None;
                }
                let floor = current.start_time.unwrap_or(current.schedule_time);
                let mut next = current.clone();
                next.state = *state;
                next.finish_time = Some((*at).max(floor));
                next.completion_level = 100;
                if next.result.is_none() {
                    next.result = result.clone();
                }
                Some(next)
            }
        }
    }
}
