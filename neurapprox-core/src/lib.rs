//! # neurapprox-core — supervised function approximation, backend agnostic
//!
//! An [`Approximator`] maps bounded input vectors to output vectors through a
//! pluggable trainable model. The crate owns everything around the model:
//! scaling between data space and the backend's neuron ranges, tolerance
//! resolution, error evaluation, the bundle training loop with its stop
//! criteria, dependency tracking between settings, and persistence.
//!
//! Backends implement [`TrainableModel`] and are registered by type tag in a
//! [`BackendRegistry`]. A small tanh multilayer perceptron ships as the
//! reference backend under the `"mlp"` tag.

// Foundation
pub mod config;
pub mod error;

// Numeric building blocks
pub mod bounds;
pub mod metrics;
pub mod tolerance;

// Data & backends
pub mod backend;
pub mod data;

// Engine
pub mod approximator;
pub mod persistence;
pub mod state;
pub mod training;

// Re-exports
pub use approximator::{Approximator, SharedApproximator};
pub use backend::{BackendFactory, BackendRegistry, MlpBackend, NetworkArchitecture, TrainableModel};
pub use bounds::{BoundingBox, Interval};
pub use config::{ApproximatorConfig, EngineConfig, MlpSettings, TrainingSettings, load_config};
pub use data::{Subset, TrainingDataSet, TrainingDataSource, VerificationIndexSet};
pub use error::{ApproxError, Result};
pub use metrics::{ErrorMeasure, ErrorSummary};
pub use tolerance::{Tolerance, ToleranceKind, ToleranceSpec};
pub use training::{BreakHandle, StopReason, TrainingOutcome, TrainingState};
