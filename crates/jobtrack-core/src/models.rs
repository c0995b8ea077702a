//! Job record data model and lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// =============================================================================
// JOB STATE
// =============================================================================

/// Lifecycle state of a tracked job.
///
/// ```text
/// SCHEDULED ──► RUNNING ──► FINISHED | FAILED | CANCELED
///     │            │              ▲
///     └──► CANCEL_REQUESTED ◄─────┘ (then exactly one terminal state)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Scheduled,
    Running,
    CancelRequested,
    Finished,
    Failed,
    Canceled,
}

impl JobState {
    /// Every state, in lifecycle order.
    pub const ALL: [JobState; 6] = [
        JobState::Scheduled,
        JobState::Running,
        JobState::CancelRequested,
        JobState::Finished,
        JobState::Failed,
        JobState::Canceled,
    ];

    /// Terminal states. Nothing leaves them.
    pub const TERMINAL: [JobState; 3] = [JobState::Finished, JobState::Failed, JobState::Canceled];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Scheduled => "SCHEDULED",
            JobState::Running => "RUNNING",
            JobState::CancelRequested => "CANCEL_REQUESTED",
            JobState::Finished => "FINISHED",
            JobState::Failed => "FAILED",
            JobState::Canceled => "CANCELED",
        }
    }

    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Finished | JobState::Failed | JobState::Canceled
        )
    }

    /// Whether a cancellation request is still meaningful for this state.
    pub fn is_cancelable(&self) -> bool {
        matches!(self, JobState::Scheduled | JobState::Running)
    }

    /// Whether `self -> next` is an edge of the state machine.
    ///
    /// Staying in the same state is not a transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (*self, next) {
            (Scheduled, Running | CancelRequested) => true,
            (Running, CancelRequested) => true,
            (Scheduled | Running | CancelRequested, Finished | Failed | Canceled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SCHEDULED" => Ok(JobState::Scheduled),
            "RUNNING" => Ok(JobState::Running),
            "CANCEL_REQUESTED" => Ok(JobState::CancelRequested),
            "FINISHED" => Ok(JobState::Finished),
            "FAILED" => Ok(JobState::Failed),
            "CANCELED" => Ok(JobState::Canceled),
            other => Err(Error::InvalidInput(format!("unknown job state: {other}"))),
        }
    }
}

// =============================================================================
// JOB RECORD
// =============================================================================

/// Persisted scheduling state of a single job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub description: String,
    pub owner: String,
    pub schedule_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub state: JobState,
    /// Percentage in `0..=100`.
    pub completion_level: u8,
    pub deleted: bool,
    /// Opaque serialized job inputs.
    pub parameters: String,
    /// Opaque serialized return value or error description.
    pub result: Option<String>,
}

impl JobRecord {
    /// A freshly scheduled record.
    pub fn scheduled(descriptor: &JobDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            id: descriptor.id.clone(),
            description: descriptor.description.clone(),
            owner: descriptor.owner.clone(),
            schedule_time: now,
            start_time: None,
            finish_time: None,
            state: JobState::Scheduled,
            completion_level: 0,
            deleted: false,
            parameters: descriptor.parameters.clone(),
            result: None,
        }
    }

    /// Whether the job body has finished, whatever the outcome.
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }
}

// =============================================================================
// SUBMISSION / OUTCOME
// =============================================================================

/// Identity and inputs of a submitted job, as seen by lifecycle listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: String,
    pub description: String,
    pub owner: String,
    pub parameters: String,
    /// Remove the record once the job finishes or is canceled.
    pub auto_clean: bool,
}

/// Result reported by a job body, carrying an explicit classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "payload", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The job completed its work.
    Success(Option<String>),
    /// The job observed and honored a cancellation request.
    Canceled(Option<String>),
    /// The job failed; the payload describes the error.
    Failed(String),
}

impl JobOutcome {
    /// Terminal state this outcome maps to.
    pub fn terminal_state(&self) -> JobState {
        match self {
            JobOutcome::Success(_) => JobState::Finished,
            JobOutcome::Canceled(_) => JobState::Canceled,
            JobOutcome::Failed(_) => JobState::Failed,
        }
    }

    pub fn payload(&self) -> Option<&str> {
        match self {
            JobOutcome::Success(p) | JobOutcome::Canceled(p) => p.as_deref(),
            JobOutcome::Failed(e) => Some(e.as_str()),
        }
    }

    pub fn into_payload(self) -> Option<String> {
        match self {
            JobOutcome::Success(p) | JobOutcome::Canceled(p) => p,
            JobOutcome::Failed(e) => Some(e),
        }
    }
}

// =============================================================================
// QUERY RESULTS
// =============================================================================

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPage {
    pub items: Vec<JobRecord>,
    pub offset: usize,
    pub limit: usize,
    /// Number of records matching the filter, across all pages.
    pub total: usize,
}

impl JobPage {
    pub fn empty(offset: usize, limit: usize) -> Self {
        Self {
            items: Vec::new(),
            offset,
            limit,
            total: 0,
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|r| r.id.as_str()).collect()
    }
}

/// Count of visible (non-deleted) records per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub scheduled: usize,
    pub running: usize,
    pub cancel_requested: usize,
    pub finished: usize,
    pub failed: usize,
    pub canceled: usize,
}

impl JobStats {
    pub fn record(&mut self, state: JobState) {
        match state {
            JobState::Scheduled => self.scheduled += 1,
            JobState::Running => self.running += 1,
            JobState::CancelRequested => self.cancel_requested += 1,
            JobState::Finished => self.finished += 1,
            JobState::Failed => self.failed += 1,
            JobState::Canceled => self.canceled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.scheduled
            + self.running
            + self.cancel_requested
            + self.finished
            + self.failed
            + self.canceled
    }
}
