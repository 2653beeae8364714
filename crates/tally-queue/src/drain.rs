//! Graceful shutdown drain: stop intake, wait (bounded) for in-flight
//! jobs, report what remains.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Drain state machine. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DrainPhase {
    Running,
    Draining,
    Drained,
}

/// Shared drain flag read by the submission gate and worker pools.
#[derive(Debug)]
pub struct DrainState {
    phase: AtomicU8,
}

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const DRAINED: u8 = 2;

impl Default for DrainState {
    fn default() -> Self {
        Self::new()
    }
}

impl DrainState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(RUNNING),
        }
    }

    pub fn phase(&self) -> DrainPhase {
        match self.phase.load(Ordering::SeqCst) {
            RUNNING => DrainPhase::Running,
            DRAINING => DrainPhase::Draining,
            _ => DrainPhase::Drained,
        }
    }

    /// Submission gate: false from the moment draining begins.
    pub fn is_accepting_jobs(&self) -> bool {
        self.phase.load(Ordering::SeqCst) == RUNNING
    }

    pub(crate) fn begin_draining(&self) {
        let _ = self
            .phase
            .compare_exchange(RUNNING, DRAINING, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub(crate) fn finish(&self) {
        self.phase.store(DRAINED, Ordering::SeqCst);
    }
}

/// Outcome of a drain call. A timeout is a reported condition, not an
/// error: shutdown proceeds either way.
#[derive(Debug, Clone, Serialize)]
pub struct DrainReport {
    pub elapsed: Duration,
    pub timed_out: bool,
    /// Queues still holding active jobs when the drain ended.
    pub remaining: Vec<(String, usize)>,
}

impl DrainReport {
    pub fn fully_drained(&self) -> bool {
        self.remaining.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_monotonically() {
        let state = DrainState::new();
        assert!(state.is_accepting_jobs());
        assert_eq!(state.phase(), DrainPhase::Running);

        state.begin_draining();
        assert!(!state.is_accepting_jobs());
        assert_eq!(state.phase(), DrainPhase::Draining);

        // A second begin is a no-op, not a reset.
        state.begin_draining();
        assert_eq!(state.phase(), DrainPhase::Draining);

        state.finish();
        assert_eq!(state.phase(), DrainPhase::Drained);
        assert!(!state.is_accepting_jobs());
    }
}
