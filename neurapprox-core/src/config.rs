//! Configuration for the approximation engine.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides.

use crate::error::{ApproxError, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Training loop settings.
    #[serde(default)]
    pub training: TrainingSettings,
    /// Reference mlp backend settings.
    #[serde(default)]
    pub mlp: MlpSettings,
}

/// Network shape of an approximator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproximatorConfig {
    pub input_len: usize,
    pub output_len: usize,
    #[serde(default)]
    pub hidden_layers: Vec<usize>,
    /// One sub-network per output dimension instead of one shared network.
    #[serde(default)]
    pub multiple_networks: bool,
}

impl ApproximatorConfig {
    pub fn new(input_len: usize, output_len: usize, hidden_layers: Vec<usize>) -> Self {
        Self {
            input_len,
            output_len,
            hidden_layers,
            multiple_networks: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_len == 0 {
            return Err(ApproxError::invalid_config("input length must be positive"));
        }
        if self.output_len == 0 {
            return Err(ApproxError::invalid_config("output length must be positive"));
        }
        if self.hidden_layers.contains(&0) {
            return Err(ApproxError::invalid_config(
                "hidden layer sizes must be positive",
            ));
        }
        Ok(())
    }

    /// Number of backend networks this configuration needs.
    pub fn network_count(&self) -> usize {
        if self.multiple_networks {
            self.output_len
        } else {
            1
        }
    }
}

/// Training loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// Epoch budget for unbounded training.
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
    /// Epochs run between stop-criteria checks.
    #[serde(default = "default_epochs_in_bundle")]
    pub epochs_in_bundle: usize,
    /// Append a convergence record after each bundle.
    #[serde(default = "default_true")]
    pub record_convergence: bool,
    /// Expansion applied to data bounds derived from training data (>= 1.0).
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            max_epochs: default_max_epochs(),
            epochs_in_bundle: default_epochs_in_bundle(),
            record_convergence: true,
            safety_factor: default_safety_factor(),
        }
    }
}

impl TrainingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.epochs_in_bundle == 0 {
            return Err(ApproxError::invalid_config("epochs_in_bundle must be positive"));
        }
        if !self.safety_factor.is_finite() || self.safety_factor < 1.0 {
            return Err(ApproxError::invalid_config(format!(
                "safety factor must be >= 1.0, got {}",
                self.safety_factor
            )));
        }
        Ok(())
    }
}

fn default_max_epochs() -> usize {
    10_000
}

fn default_epochs_in_bundle() -> usize {
    100
}

fn default_safety_factor() -> f64 {
    1.0
}

/// Settings of the reference mlp backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpSettings {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    /// Seed for weight initialisation and sample order.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for MlpSettings {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            momentum: default_momentum(),
            seed: default_seed(),
        }
    }
}

fn default_learning_rate() -> f64 {
    0.02
}

fn default_momentum() -> f64 {
    0.5
}

fn default_seed() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `NEURAPPROX_`)
/// 3. Workspace-local config (`.neurapprox/config.toml`)
/// 4. User config (`~/.config/neurapprox/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&EngineConfig>,
) -> Result<EngineConfig> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "neurapprox", "neurapprox") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".neurapprox").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // NEURAPPROX_TRAINING__MAX_EPOCHS, NEURAPPROX_MLP__SEED, ...
    figment = figment.merge(Env::prefixed("NEURAPPROX_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: EngineConfig = figment.extract().map_err(Box::new)?;
    config.training.validate()?;
    Ok(config)
}
