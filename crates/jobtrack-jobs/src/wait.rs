//! Caller-side waiting for a job's completion event.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use jobtrack_core::{
    job_completed_address, Error, EventBus, EventEnvelope, JobEvent, JobState, Result,
};

/// Receives per-job completion events from an [`EventBus`].
///
/// Subscribe before submitting the job: events published before the
/// subscription exists are not replayed.
pub struct CompletionWaiter {
    rx: broadcast::Receiver<EventEnvelope>,
}

impl CompletionWaiter {
    pub fn subscribe(bus: &EventBus) -> Self {
        Self { rx: bus.subscribe() }
    }

    /// Wait until `job_id` reaches a terminal state, at most `timeout`.
    ///
    /// Returns [`Error::Lagged`] when events were dropped before the
    /// completion arrived; the caller should then read the record instead.
    /// The waiter is usable again afterwards.
    pub async fn wait(&mut self, job_id: &str, timeout: Duration) -> Result<JobState> {
        let address = job_completed_address(job_id);
        tokio::time::timeout(timeout, self.next_completion(&address, job_id))
            .await
            .map_err(|_| Error::Timeout(format!("waiting for job {job_id} to complete")))?
    }

    async fn next_completion(&mut self, address: &str, job_id: &str) -> Result<JobState> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if envelope.address == address => {
                    if let JobEvent::Completed { state, .. } = envelope.payload {
                        return Ok(state);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    // The completion may be among the skipped events.
                    warn!(
                        subsystem = "tracker",
                        component = "waiter",
                        job_id,
                        skipped,
                        "Completion waiter lagged behind the event bus"
                    );
                    return Err(Error::Lagged(skipped));
                }
                Err(RecvError::Closed) => {
                    return Err(Error::Internal("event bus closed".to_string()));
                }
            }
        }
    }
}
