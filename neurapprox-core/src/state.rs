//! Dirty-flag graph behind the approximator.
//!
//! Invalidation levels nest: every level clears what the levels below it
//! clear. Setters pick the level matching what they touch and apply it in one
//! call instead of resetting flags by hand.

use std::path::PathBuf;
use tracing::debug;

/// How far an invalidation cascade reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Invalidation {
    /// Cached outputs and the persisted-state path.
    Training,
    /// Plus the trained flag, prepared training data and the epoch count.
    TrainingData,
    /// Plus the backend model itself.
    Network,
}

/// Flags describing which derived state is currently valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyFlags {
    pub network_prepared: bool,
    pub training_data_prepared: bool,
    pub trained: bool,
    pub training_outputs_valid: bool,
    pub verification_outputs_valid: bool,
    pub epoch_count: usize,
    /// Blob locations of the last save; cleared once the model diverges from them.
    pub persisted_paths: Option<Vec<PathBuf>>,
}

impl DirtyFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an invalidation cascade.
    pub fn invalidate(&mut self, level: Invalidation) {
        debug!(?level, "Invalidating approximator state");
        self.training_outputs_valid = false;
        self.verification_outputs_valid = false;
        self.persisted_paths = None;
        if level >= Invalidation::TrainingData {
            self.trained = false;
            self.training_data_prepared = false;
            self.epoch_count = 0;
        }
        if level >= Invalidation::Network {
            self.network_prepared = false;
        }
    }

    pub fn invalidate_training_dependencies(&mut self) {
        self.invalidate(Invalidation::Training);
    }

    pub fn invalidate_training_data_dependencies(&mut self) {
        self.invalidate(Invalidation::TrainingData);
    }

    pub fn invalidate_network_dependencies(&mut self) {
        self.invalidate(Invalidation::Network);
    }

    /// True when no snapshot matches the current trained state.
    pub fn needs_save(&self) -> bool {
        self.trained && self.persisted_paths.is_none()
    }
}
