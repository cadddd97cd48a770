//! Reference backend: a tanh multilayer perceptron trained by per-sample
//! gradient descent with momentum.
//!
//! Hidden layers use `tanh`, the output layer is linear. Inputs and outputs
//! are expected in `[-1, 1]`.

use super::{NetworkArchitecture, TrainableModel};
use crate::config::MlpSettings;
use crate::error::{ApproxError, Result};
use crate::persistence::{atomic_write_json, load_json};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Type tag of the reference backend.
pub const MLP_TAG: &str = "mlp";

const BLOB_FORMAT_VERSION: u32 = 1;

/// Fully connected layer, `weights[out][in]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Dense {
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
}

impl Dense {
    fn random(in_dim: usize, out_dim: usize, rng: &mut StdRng) -> Self {
        let scale = 1.0 / (in_dim.max(1) as f64).sqrt();
        let weights = (0..out_dim)
            .map(|_| (0..in_dim).map(|_| rng.gen_range(-scale..scale)).collect())
            .collect();
        Self {
            weights,
            biases: vec![0.0; out_dim],
        }
    }

    fn zeros_like(other: &Dense) -> Self {
        Self {
            weights: other.weights.iter().map(|row| vec![0.0; row.len()]).collect(),
            biases: vec![0.0; other.biases.len()],
        }
    }

    fn forward(&self, input: &[f64], linear: bool) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.biases)
            .map(|(row, b)| {
                let z = row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + b;
                if linear { z } else { z.tanh() }
            })
            .collect()
    }
}

/// Serialized form of a trained network.
#[derive(Debug, Serialize, Deserialize)]
struct MlpBlob {
    format_version: u32,
    architecture: NetworkArchitecture,
    layers: Vec<Dense>,
    epochs_trained: usize,
}

/// Reference [`TrainableModel`] implementation.
pub struct MlpBackend {
    settings: MlpSettings,
    architecture: Option<NetworkArchitecture>,
    layers: Vec<Dense>,
    velocity: Vec<Dense>,
    inputs: Vec<Vec<f64>>,
    targets: Vec<Vec<f64>>,
    order: Vec<usize>,
    rng: StdRng,
    epochs_trained: usize,
}

impl MlpBackend {
    pub fn new(settings: MlpSettings) -> Self {
        let rng = StdRng::seed_from_u64(settings.seed);
        Self {
            settings,
            architecture: None,
            layers: Vec::new(),
            velocity: Vec::new(),
            inputs: Vec::new(),
            targets: Vec::new(),
            order: Vec::new(),
            rng,
            epochs_trained: 0,
        }
    }

    pub fn epochs_trained(&self) -> usize {
        self.epochs_trained
    }

    fn architecture(&self) -> Result<&NetworkArchitecture> {
        self.architecture
            .as_ref()
            .ok_or_else(|| ApproxError::not_prepared("mlp network has not been created"))
    }

    /// Activations of every layer, input first.
    fn activations(&self, input: &[f64]) -> Vec<Vec<f64>> {
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(input.to_vec());
        let last = self.layers.len().saturating_sub(1);
        for (idx, layer) in self.layers.iter().enumerate() {
            let next = layer.forward(&acts[idx], idx == last);
            acts.push(next);
        }
        acts
    }

    fn train_sample(&mut self, sample: usize) {
        let acts = self.activations(&self.inputs[sample]);
        let target = &self.targets[sample];
        let lr = self.settings.learning_rate;
        let momentum = self.settings.momentum;

        // Output layer is linear, so the MSE gradient is the raw difference.
        let mut delta: Vec<f64> = acts[acts.len() - 1]
            .iter()
            .zip(target)
            .map(|(a, t)| a - t)
            .collect();

        for l in (0..self.layers.len()).rev() {
            let prev = &acts[l];
            let next_delta = if l > 0 {
                let mut back = vec![0.0; prev.len()];
                for (row, d) in self.layers[l].weights.iter().zip(&delta) {
                    for (b, w) in back.iter_mut().zip(row) {
                        *b += w * d;
                    }
                }
                for (b, a) in back.iter_mut().zip(prev) {
                    *b *= 1.0 - a * a;
                }
                Some(back)
            } else {
                None
            };

            let layer = &mut self.layers[l];
            let vel = &mut self.velocity[l];
            for (j, d) in delta.iter().enumerate() {
                for (i, a) in prev.iter().enumerate() {
                    let v = momentum * vel.weights[j][i] - lr * d * a;
                    vel.weights[j][i] = v;
                    layer.weights[j][i] += v;
                }
                let v = momentum * vel.biases[j] - lr * d;
                vel.biases[j] = v;
                layer.biases[j] += v;
            }

            if let Some(back) = next_delta {
                delta = back;
            }
        }
    }
}

impl TrainableModel for MlpBackend {
    fn type_tag(&self) -> &str {
        MLP_TAG
    }

    fn create_network(&mut self, architecture: &NetworkArchitecture) -> Result<()> {
        if architecture.input_len == 0 || architecture.output_len == 0 {
            return Err(ApproxError::invalid_config(
                "mlp network needs at least one input and one output",
            ));
        }
        if architecture.hidden_layers.contains(&0) {
            return Err(ApproxError::invalid_config("hidden layers must not be empty"));
        }
        self.rng = StdRng::seed_from_u64(self.settings.seed);
        let sizes = architecture.layer_sizes();
        self.layers = sizes
            .windows(2)
            .map(|w| Dense::random(w[0], w[1], &mut self.rng))
            .collect();
        self.velocity = self.layers.iter().map(Dense::zeros_like).collect();
        self.architecture = Some(architecture.clone());
        self.epochs_trained = 0;
        debug!(layers = ?sizes, "Created mlp network");
        Ok(())
    }

    fn set_training_data(&mut self, inputs: &[Vec<f64>], outputs: &[Vec<f64>]) -> Result<()> {
        let arch = self.architecture()?;
        if inputs.len() != outputs.len() {
            return Err(ApproxError::dimension("training outputs", inputs.len(), outputs.len()));
        }
        if let Some(bad) = inputs.iter().find(|x| x.len() != arch.input_len) {
            return Err(ApproxError::dimension("mlp input", arch.input_len, bad.len()));
        }
        if let Some(bad) = outputs.iter().find(|y| y.len() != arch.output_len) {
            return Err(ApproxError::dimension("mlp output", arch.output_len, bad.len()));
        }
        self.inputs = inputs.to_vec();
        self.targets = outputs.to_vec();
        self.order = (0..self.inputs.len()).collect();
        Ok(())
    }

    fn train_epochs(&mut self, epochs: usize) -> Result<()> {
        self.architecture()?;
        if self.inputs.is_empty() {
            return Err(ApproxError::not_prepared("mlp has no training data"));
        }
        for _ in 0..epochs {
            let mut order = std::mem::take(&mut self.order);
            order.shuffle(&mut self.rng);
            for &sample in &order {
                self.train_sample(sample);
            }
            self.order = order;
            self.epochs_trained += 1;
        }
        Ok(())
    }

    fn calculate_output(&self, input: &[f64]) -> Result<Vec<f64>> {
        let arch = self.architecture()?;
        if input.len() != arch.input_len {
            return Err(ApproxError::dimension("mlp input", arch.input_len, input.len()));
        }
        Ok(self.activations(input).pop().unwrap_or_default())
    }

    fn save_blob(&self, path: &Path) -> Result<()> {
        let blob = MlpBlob {
            format_version: BLOB_FORMAT_VERSION,
            architecture: self.architecture()?.clone(),
            layers: self.layers.clone(),
            epochs_trained: self.epochs_trained,
        };
        atomic_write_json(path, &blob)?;
        Ok(())
    }

    fn load_blob(&mut self, path: &Path) -> Result<()> {
        let blob: MlpBlob = load_json(path)?.ok_or_else(|| {
            ApproxError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("mlp blob not found: {}", path.display()),
            ))
        })?;
        if blob.format_version != BLOB_FORMAT_VERSION {
            return Err(ApproxError::backend(format!(
                "unsupported mlp blob version {}",
                blob.format_version
            )));
        }
        if let Some(expected) = &self.architecture {
            if *expected != blob.architecture {
                return Err(ApproxError::backend(
                    "mlp blob architecture does not match the configured network",
                ));
            }
        }
        let sizes = blob.architecture.layer_sizes();
        let consistent = blob.layers.len() + 1 == sizes.len()
            && blob.layers.iter().zip(sizes.windows(2)).all(|(layer, w)| {
                layer.weights.len() == w[1]
                    && layer.biases.len() == w[1]
                    && layer.weights.iter().all(|row| row.len() == w[0])
            });
        if !consistent {
            return Err(ApproxError::backend("mlp blob layer shapes are inconsistent"));
        }
        self.velocity = blob.layers.iter().map(Dense::zeros_like).collect();
        self.layers = blob.layers;
        self.architecture = Some(blob.architecture);
        self.epochs_trained = blob.epochs_trained;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn arch() -> NetworkArchitecture {
        NetworkArchitecture {
            input_len: 1,
            output_len: 1,
            hidden_layers: vec![8],
        }
    }

    fn line_data() -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        let xs: Vec<Vec<f64>> = (0..11).map(|i| vec![-1.0 + 0.2 * i as f64]).collect();
        let ys = xs.iter().map(|x| vec![0.5 * x[0]]).collect();
        (xs, ys)
    }

    fn mse(model: &MlpBackend, xs: &[Vec<f64>], ys: &[Vec<f64>]) -> f64 {
        xs.iter()
            .zip(ys)
            .map(|(x, y)| {
                let out = model.calculate_output(x).unwrap();
                (out[0] - y[0]).powi(2)
            })
            .sum::<f64>()
            / xs.len() as f64
    }

    #[test]
    fn test_training_reduces_error() {
        let mut model = MlpBackend::new(MlpSettings::default());
        model.create_network(&arch()).unwrap();
        let (xs, ys) = line_data();
        model.set_training_data(&xs, &ys).unwrap();
        let before = mse(&model, &xs, &ys);
        model.train_epochs(200).unwrap();
        let after = mse(&model, &xs, &ys);
        assert!(after < before, "mse {after} should drop below {before}");
        assert_eq!(model.epochs_trained(), 200);
    }

    #[test]
    fn test_requires_network_and_data() {
        let mut model = MlpBackend::new(MlpSettings::default());
        assert!(model.train_epochs(1).is_err());
        assert!(model.calculate_output(&[0.0]).is_err());
        model.create_network(&arch()).unwrap();
        assert!(matches!(
            model.train_epochs(1),
            Err(ApproxError::NotPrepared(_))
        ));
    }

    #[test]
    fn test_same_seed_same_network() {
        let mut a = MlpBackend::new(MlpSettings::default());
        let mut b = MlpBackend::new(MlpSettings::default());
        a.create_network(&arch()).unwrap();
        b.create_network(&arch()).unwrap();
        assert_eq!(
            a.calculate_output(&[0.3]).unwrap(),
            b.calculate_output(&[0.3]).unwrap()
        );
    }

    #[test]
    fn test_blob_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("net.json");
        let mut model = MlpBackend::new(MlpSettings::default());
        model.create_network(&arch()).unwrap();
        let (xs, ys) = line_data();
        model.set_training_data(&xs, &ys).unwrap();
        model.train_epochs(10).unwrap();
        model.save_blob(&path).unwrap();

        let mut restored = MlpBackend::new(MlpSettings::default());
        restored.load_blob(&path).unwrap();
        let a = model.calculate_output(&[0.25]).unwrap()[0];
        let b = restored.calculate_output(&[0.25]).unwrap()[0];
        assert!((a - b).abs() < 1e-12);
        assert_eq!(restored.epochs_trained(), 10);
    }

    #[test]
    fn test_load_missing_blob() {
        let mut model = MlpBackend::new(MlpSettings::default());
        assert!(model.load_blob(Path::new("/nonexistent/net.json")).is_err());
    }
}
