//! Trainable model capability interface and the tag-keyed backend registry.
//!
//! The engine never implements a learning algorithm itself. It drives a
//! [`TrainableModel`] through create / train / calculate / save / load and
//! picks the implementation by its type tag. Backends that are not
//! registered simply do not exist.

pub mod mlp;

use crate::bounds::Interval;
use crate::config::MlpSettings;
use crate::error::{ApproxError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub use mlp::MlpBackend;

/// Layer sizes of one backend network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkArchitecture {
    pub input_len: usize,
    pub output_len: usize,
    pub hidden_layers: Vec<usize>,
}

impl NetworkArchitecture {
    /// All layer widths from input to output.
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.hidden_layers.len() + 2);
        sizes.push(self.input_len);
        sizes.extend(&self.hidden_layers);
        sizes.push(self.output_len);
        sizes
    }
}

/// Capability set a backend model provides.
///
/// `train_epochs` is resumable: successive calls continue from the current
/// weights and never reset them.
pub trait TrainableModel: Send {
    /// Type tag the backend is registered under.
    fn type_tag(&self) -> &str;

    /// Range the backend wants inputs scaled into.
    fn neuron_input_range(&self) -> Interval {
        Interval::new(-1.0, 1.0)
    }

    /// Range the backend's outputs live in.
    fn neuron_output_range(&self) -> Interval {
        Interval::new(-1.0, 1.0)
    }

    fn create_network(&mut self, architecture: &NetworkArchitecture) -> Result<()>;

    /// Hand over already-scaled training pairs.
    fn set_training_data(&mut self, inputs: &[Vec<f64>], outputs: &[Vec<f64>]) -> Result<()>;

    fn train_epochs(&mut self, epochs: usize) -> Result<()>;

    fn calculate_output(&self, input: &[f64]) -> Result<Vec<f64>>;

    fn save_blob(&self, path: &Path) -> Result<()>;

    fn load_blob(&mut self, path: &Path) -> Result<()>;
}

type BuildFn = dyn Fn() -> Box<dyn TrainableModel> + Send + Sync;

/// Creates fresh model instances for one backend type.
#[derive(Clone)]
pub struct BackendFactory {
    tag: String,
    build: Arc<BuildFn>,
}

impl BackendFactory {
    pub fn new<F>(tag: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> Box<dyn TrainableModel> + Send + Sync + 'static,
    {
        Self {
            tag: tag.into(),
            build: Arc::new(build),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn create(&self) -> Box<dyn TrainableModel> {
        (self.build)()
    }
}

impl fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendFactory")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

/// Registry of backend factories keyed by type tag.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends.
    pub fn with_defaults(mlp: &MlpSettings) -> Self {
        let mut registry = Self::new();
        let settings = mlp.clone();
        registry.register(BackendFactory::new(mlp::MLP_TAG, move || {
            Box::new(MlpBackend::new(settings.clone()))
        }));
        registry
    }

    /// Register a factory, replacing any previous one under the same tag.
    pub fn register(&mut self, factory: BackendFactory) {
        if self.factories.contains_key(factory.tag()) {
            tracing::debug!(tag = factory.tag(), "Replacing registered backend");
        }
        self.factories.insert(factory.tag().to_string(), factory);
    }

    pub fn get(&self, tag: &str) -> Result<BackendFactory> {
        self.factories
            .get(tag)
            .cloned()
            .ok_or_else(|| ApproxError::UnknownBackend(tag.to_string()))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
