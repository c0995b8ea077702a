//! # jobtrack-core
//!
//! Core types, traits, and abstractions for the jobtrack job tracking
//! subsystem.
//!
//! This crate provides the job record model and its lifecycle state machine,
//! the named conditional mutations stores apply atomically, record filters,
//! notification payloads with the in-process event bus, and the trait seams
//! (`JobRecordStore`, `NotificationBus`, `JobListener`) the other crates plug
//! into.

pub mod defaults;
pub mod error;
pub mod events;
pub mod filter;
pub mod models;
pub mod mutation;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{
    job_completed_address, parse_job_completed_address, EventBus, EventEnvelope, JobEvent,
    JOBS_ADDRESS, JOB_COMPLETED_ADDRESS_TEMPLATE, JOB_ID_PLACEHOLDER,
};
pub use filter::JobFilter;
pub use models::*;
pub use mutation::JobMutation;
pub use traits::*;
