//! Centralized default constants for jobtrack.
//!
//! All crates and the CLI reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for job listings.
pub const PAGE_LIMIT: usize = 50;

/// Upper bound on a single page; larger requests are clamped.
pub const PAGE_LIMIT_MAX: usize = 1_000;

/// Default page offset.
pub const PAGE_OFFSET: usize = 0;

/// Page size used when the tracker walks every matching record internally.
pub const INTERNAL_FETCH_LIMIT: usize = 10_000;

// =============================================================================
// EVENTS
// =============================================================================

/// Buffer capacity of the in-process event bus.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// EXECUTION
// =============================================================================

/// Maximum number of job bodies running at once.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Number of work units a job declares when it never calls `begin_task`.
pub const PROGRESS_UNKNOWN_TOTAL: u64 = 0;

/// Upper bound of the completion level.
pub const COMPLETION_LEVEL_MAX: u8 = 100;

// =============================================================================
// WAITING
// =============================================================================

/// Default time a caller waits for a completion event.
pub const COMPLETION_WAIT_SECS: u64 = 30;
