//! Progress reporting for job bodies.
//!
//! A job body reports work through a nested [`ProgressMonitor`] signal
//! (`begin_task`, `worked`, `done`). [`CompletionLevelMonitor`] turns that raw
//! signal into a 0-100 completion level and calls back only when the level
//! goes up, so a job reports at most 101 distinct levels however fine-grained
//! its work units are.

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use jobtrack_core::defaults::{COMPLETION_LEVEL_MAX, PROGRESS_UNKNOWN_TOTAL};

/// Nested progress signal reported by a job body.
pub trait ProgressMonitor: Send + Sync {
    /// Declare the amount of work the task will report. Only the first call
    /// counts.
    fn begin_task(&self, name: &str, total_work: u64);

    /// Report `amount` more units of completed work.
    fn worked(&self, amount: u64);

    /// Mark the task complete.
    fn done(&self);

    /// Whether the job has been asked to stop.
    fn is_canceled(&self) -> bool {
        false
    }
}

/// Monitor that discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressMonitor;

impl ProgressMonitor for NullProgressMonitor {
    fn begin_task(&self, _name: &str, _total_work: u64) {}
    fn worked(&self, _amount: u64) {}
    fn done(&self) {}
}

/// Completion level callback.
pub type ProgressCallback = Box<dyn Fn(u8) + Send + Sync>;

#[derive(Debug, Default)]
struct ProgressState {
    total_work: u64,
    units_worked: u64,
    level: u8,
    started: bool,
    done: bool,
}

impl ProgressState {
    fn level(&self) -> u8 {
        if self.total_work == PROGRESS_UNKNOWN_TOTAL {
            return 0;
        }
        let worked = self.units_worked.min(self.total_work) as u128;
        let level = worked * u128::from(COMPLETION_LEVEL_MAX) / self.total_work as u128;
        // worked <= total_work, so level <= 100
        level as u8
    }
}

/// Adapter from work units to a throttled completion level.
pub struct CompletionLevelMonitor {
    state: Mutex<ProgressState>,
    on_progress_update: ProgressCallback,
    cancel: Option<CancellationToken>,
}

impl CompletionLevelMonitor {
    pub fn new<F>(on_progress_update: F) -> Self
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        Self {
            state: Mutex::new(ProgressState::default()),
            on_progress_update: Box::new(on_progress_update),
            cancel: None,
        }
    }

    /// Answer `is_canceled` from `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Last level reported through the callback.
    pub fn completion_level(&self) -> u8 {
        self.lock().level
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Report the new level if it went up. Runs under the state lock so
    /// callbacks arrive in increasing order.
    fn publish(&self, state: &mut ProgressState, level: u8) {
        if level > state.level {
            state.level = level;
            (self.on_progress_update)(level);
        }
    }
}

impl ProgressMonitor for CompletionLevelMonitor {
    fn begin_task(&self, _name: &str, total_work: u64) {
        let mut state = self.lock();
        if state.started || state.done {
            return;
        }
        state.started = true;
        state.total_work = total_work;
    }

    fn worked(&self, amount: u64) {
        let mut state = self.lock();
        if state.done {
            return;
        }
        state.units_worked = state.units_worked.saturating_add(amount);
        let level = state.level();
        self.publish(&mut state, level);
    }

    fn done(&self) {
        let mut state = self.lock();
        if state.done {
            return;
        }
        state.done = true;
        // Equivalent to worked(total_work - units_worked); a task that never
        // declared its size still ends at 100.
        state.units_worked = state.units_worked.max(state.total_work);
        self.publish(&mut state, COMPLETION_LEVEL_MAX);
    }

    fn is_canceled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}
