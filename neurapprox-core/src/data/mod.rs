//! Sampled (input, output) pairs and the held-out verification subset.

pub mod dataset;
pub mod verification;

pub use dataset::{DataElement, TrainingDataSet, TrainingDataSource};
pub use verification::{Subset, VerificationIndexSet};
