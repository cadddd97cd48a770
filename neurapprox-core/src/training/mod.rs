//! Training controller building blocks: lifecycle states, stop criteria,
//! convergence history and cooperative cancellation.
//!
//! The bundle loop itself lives on [`crate::Approximator`], which owns the
//! backend and the caches these checks read from.

pub mod criteria;
pub mod history;

pub use criteria::{FamilyCheck, check_family, stop_criteria_met, tolerances_met};
pub use history::{ConvergenceHistory, ConvergenceRecord};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle of an approximator's training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingState {
    NotPrepared,
    Prepared,
    Training,
    Converged,
    EpochLimitReached,
    Cancelled,
}

/// Why an unbounded training run returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Converged,
    EpochLimitReached,
    Cancelled,
}

impl From<StopReason> for TrainingState {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::Converged => TrainingState::Converged,
            StopReason::EpochLimitReached => TrainingState::EpochLimitReached,
            StopReason::Cancelled => TrainingState::Cancelled,
        }
    }
}

/// Summary of one unbounded training run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub reason: StopReason,
    /// Bundles run during this call.
    pub bundles: usize,
    /// Epochs run during this call.
    pub epochs: usize,
    /// Total epochs since the network was last reset.
    pub epoch_count: usize,
}

/// Cooperative cancellation flag, observed between bundles.
#[derive(Debug, Clone, Default)]
pub struct BreakHandle(Arc<AtomicBool>);

impl BreakHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running training loop to stop at the next bundle boundary.
    pub fn request_break(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_break_handle_shared() {
        let handle = BreakHandle::new();
        let other = handle.clone();
        other.request_break();
        assert!(handle.is_requested());
        handle.reset();
        assert!(!other.is_requested());
    }

    #[test]
    fn test_stop_reason_to_state() {
        assert_eq!(
            TrainingState::from(StopReason::Cancelled),
            TrainingState::Cancelled
        );
    }
}
