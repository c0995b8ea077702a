//! Job notification payloads, bus addresses, and the in-process event bus.
//!
//! Two kinds of traffic flow over the bus:
//!
//! - set-level notifications ([`JobEvent::Added`], [`JobEvent::Changed`],
//!   [`JobEvent::Removed`]) on the broadcast address [`JOBS_ADDRESS`];
//! - a point event ([`JobEvent::Completed`]) on a per-job address built from
//!   [`JOB_COMPLETED_ADDRESS_TEMPLATE`], so a single waiting caller does not have
//!   to scan broadcast traffic.
//!
//! Delivery is best-effort. A consumer that misses an event reconciles through
//! `search`/`get`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;
use crate::models::JobState;
use crate::traits::NotificationBus;

/// Broadcast address for job set changes.
pub const JOBS_ADDRESS: &str = "/jobs";

/// Placeholder substituted with the job id in per-job addresses.
pub const JOB_ID_PLACEHOLDER: &str = "{id}";

/// Per-job completion address template.
pub const JOB_COMPLETED_ADDRESS_TEMPLATE: &str = "/jobs/completed/{id}";

/// Address on which the completion of `job_id` is announced.
pub fn job_completed_address(job_id: &str) -> String {
    JOB_COMPLETED_ADDRESS_TEMPLATE.replace(JOB_ID_PLACEHOLDER, job_id)
}

/// Inverse of [`job_completed_address`].
pub fn parse_job_completed_address(address: &str) -> Option<&str> {
    let (prefix, suffix) = JOB_COMPLETED_ADDRESS_TEMPLATE.split_once(JOB_ID_PLACEHOLDER)?;
    let id = address.strip_prefix(prefix)?.strip_suffix(suffix)?;
    (!id.is_empty()).then_some(id)
}

// ============================================================================
// Payloads
// ============================================================================

/// Notification payload.
///
/// Serialized with a `type` tag, e.g. `{"type":"Changed","ids":["..."]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// Records were created.
    Added { ids: BTreeSet<String> },
    /// Properties of existing records changed.
    Changed { ids: BTreeSet<String> },
    /// Records were removed from view.
    Removed { ids: BTreeSet<String> },
    /// A single job reached a terminal state.
    Completed { job_id: String, state: JobState },
}

impl JobEvent {
    pub fn added(id: impl Into<String>) -> Self {
        JobEvent::Added {
            ids: BTreeSet::from([id.into()]),
        }
    }

    pub fn changed(id: impl Into<String>) -> Self {
        JobEvent::Changed {
            ids: BTreeSet::from([id.into()]),
        }
    }

    pub fn removed(id: impl Into<String>) -> Self {
        JobEvent::Removed {
            ids: BTreeSet::from([id.into()]),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::Added { .. } => "Added",
            JobEvent::Changed { .. } => "Changed",
            JobEvent::Removed { .. } => "Removed",
            JobEvent::Completed { .. } => "Completed",
        }
    }

    /// Namespaced type used in envelopes (e.g. `"job.changed"`).
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            JobEvent::Added { .. } => "job.added",
            JobEvent::Changed { .. } => "job.changed",
            JobEvent::Removed { .. } => "job.removed",
            JobEvent::Completed { .. } => "job.completed",
        }
    }

    /// Whether the event concerns `job_id`.
    pub fn mentions(&self, job_id: &str) -> bool {
        match self {
            JobEvent::Added { ids } | JobEvent::Changed { ids } | JobEvent::Removed { ids } => {
                ids.contains(job_id)
            }
            JobEvent::Completed { job_id: id, .. } => id == job_id,
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Event as it travels over the bus.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    pub address: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: JobEvent,
}

impl EventEnvelope {
    pub fn new(address: impl Into<String>, payload: JobEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            address: address.into(),
            event_type: payload.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            payload,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based bus distributing job events to every subscriber.
///
/// Slow receivers that fall behind get `Lagged` and miss events; they are
/// expected to reconcile through the tracker's read operations.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event. Dropped silently when nobody listens.
    pub fn emit(&self, address: &str, event: JobEvent) {
        let envelope = EventEnvelope::new(address, event);
        tracing::debug!(
            address = %envelope.address,
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to all traffic. Each subscriber gets its own stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[async_trait]
impl NotificationBus for EventBus {
    async fn publish(&self, address: &str, event: JobEvent) -> Result<()> {
        self.emit(address, event);
        Ok(())
    }
}
