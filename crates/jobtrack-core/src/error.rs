//! Error types for jobtrack.

use thiserror::Error;

use crate::models::JobState;

/// Result type alias using jobtrack's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for jobtrack operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Job record not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// A state change that the job state machine does not allow
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Notification could not be published
    #[error("Publish error: {0}")]
    Publish(String),

    /// Execution facility rejected or lost a task
    #[error("Executor error: {0}")]
    Executor(String),

    /// Waiting for an event took longer than allowed
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A bus subscriber fell behind and missed events
    #[error("Missed {0} events; re-read the current state")]
    Lagged(u64),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_job_not_found() {
        let err = Error::JobNotFound("b3c1".to_string());
        assert_eq!(err.to_string(), "Job not found: b3c1");
    }

    #[test]
    fn test_error_display_invalid_transition() {
        let err = Error::InvalidTransition {
            from: JobState::Finished,
            to: JobState::Running,
        };
        assert_eq!(
            err.to_string(),
            "Invalid job state transition: FINISHED -> RUNNING"
        );
    }

    #[test]
    fn test_error_display_publish() {
        let err = Error::Publish("bus closed".to_string());
        assert_eq!(err.to_string(), "Publish error: bus closed");
    }

    #[test]
    fn test_error_display_executor() {
        let err = Error::Executor("shut down".to_string());
        assert_eq!(err.to_string(), "Executor error: shut down");
    }

    #[test]
    fn test_error_display_timeout() {
        let err = Error::Timeout("job abc".to_string());
        assert_eq!(err.to_string(), "Timed out: job abc");
    }

    #[test]
    fn test_error_display_lagged() {
        let err = Error::Lagged(7);
        assert_eq!(err.to_string(), "Missed 7 events; re-read the current state");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn test_error_debug_format() {
        let err = Error::JobNotFound("abc".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("JobNotFound"));
    }
}
