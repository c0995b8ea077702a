//! Translation of tracker transitions into bus notifications.
//!
//! Publishing is best-effort: a failed publish is logged and never reaches
//! the tracker operation that triggered it.

use std::sync::Arc;

use tracing::{trace, warn};

use jobtrack_core::{job_completed_address, JobEvent, JobState, NotificationBus, JOBS_ADDRESS};

#[derive(Clone)]
pub struct NotificationPublisher {
    bus: Arc<dyn NotificationBus>,
}

impl NotificationPublisher {
    pub fn new(bus: Arc<dyn NotificationBus>) -> Self {
        Self { bus }
    }

    /// A record was created.
    pub async fn added(&self, job_id: &str) {
        self.publish(JOBS_ADDRESS, JobEvent::added(job_id)).await;
    }

    /// A record's state, completion level or deleted flag changed.
    pub async fn changed(&self, job_id: &str) {
        self.publish(JOBS_ADDRESS, JobEvent::changed(job_id)).await;
    }

    /// A record was physically removed.
    pub async fn removed(&self, job_id: &str) {
        self.publish(JOBS_ADDRESS, JobEvent::removed(job_id)).await;
    }

    /// The job reached `state`; announced on the job's own address.
    pub async fn completed(&self, job_id: &str, state: JobState) {
        let event = JobEvent::Completed {
            job_id: job_id.to_string(),
            state,
        };
        self.publish(&job_completed_address(job_id), event).await;
    }

    async fn publish(&self, address: &str, event: JobEvent) {
        let event_type = event.event_type();
        match self.bus.publish(address, event).await {
            Ok(()) => trace!(
                subsystem = "tracker",
                component = "publisher",
                address,
                event_type,
                "Published job notification"
            ),
            Err(e) => warn!(
                subsystem = "tracker",
                component = "publisher",
                address,
                event_type,
                error = %e,
                "Failed to publish job notification"
            ),
        }
    }
}
