//! # jobtrack-jobs
//!
//! Job execution and tracking for jobtrack.
//!
//! This crate provides:
//! - A bounded executor running job handlers with cooperative cancellation
//! - Progress adaptation from work units to a 0-100 completion level
//! - The job tracker persisting lifecycle callbacks and resolving
//!   cancellation and deletion requests against them
//! - Notification publishing and a caller-side completion waiter
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use jobtrack_jobs::{EventBus, JobExecutor, JobSpec, JobTracker, NoOpHandler};
//! use jobtrack_db::MemoryJobStore;
//!
//! let bus = EventBus::default();
//! let executor = JobExecutor::default();
//! let tracker = JobTracker::attach(
//!     Arc::new(MemoryJobStore::new()),
//!     Arc::new(bus.clone()),
//!     &executor,
//! )
//! .await;
//!
//! let id = executor.submit(JobSpec::new("Import", "alice"), NoOpHandler).await?;
//! let record = tracker.get(&id).await?;
//!
//! executor.shutdown().await;
//! tracker.detach().await;
//! ```

pub mod executor;
pub mod family;
pub mod handler;
pub mod progress;
pub mod publisher;
pub mod tracker;
pub mod wait;

// Re-export core types
pub use jobtrack_core::*;

pub use executor::{ExecutorConfig, JobExecutor, JobSpec, ListenerId, TaskControl};
pub use family::{AnyJob, JobFamily, JobIdFamily};
pub use handler::{FnHandler, JobContext, JobHandler, NoOpHandler};
pub use progress::{CompletionLevelMonitor, NullProgressMonitor, ProgressCallback, ProgressMonitor};
pub use publisher::NotificationPublisher;
pub use tracker::{DeleteReport, JobTracker};
pub use wait::CompletionWaiter;
