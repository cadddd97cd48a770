//! Saving through a bare file name relative to the working directory.
//!
//! Kept in its own test binary because it changes the process working
//! directory.

use std::path::Path;
use std::sync::Arc;

use neurapprox_core::backend::mlp::MLP_TAG;
use neurapprox_core::persistence::{ApproximatorSnapshot, load_json};
use neurapprox_core::{
    Approximator, ApproximatorConfig, BackendRegistry, MlpSettings, TrainingDataSet,
    TrainingSettings,
};
use tempfile::TempDir;

#[test]
fn bare_file_name_save_survives_relocation() {
    let registry = BackendRegistry::with_defaults(&MlpSettings::default());
    let mut approx = Approximator::new(
        registry.get(MLP_TAG).unwrap(),
        ApproximatorConfig::new(1, 1, vec![4]),
        TrainingSettings::default(),
    )
    .unwrap();
    let inputs: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64]).collect();
    let data = TrainingDataSet::sample(1, 1, inputs, |x| vec![x[0] * x[0]]).unwrap();
    approx.set_training_data(Arc::new(data)).unwrap();
    approx.train_epochs(5).unwrap();
    let before = approx.calculate(&[3.0]).unwrap();

    let root = TempDir::new().unwrap();
    let original = root.path().join("orig");
    let moved = root.path().join("moved");
    std::fs::create_dir_all(&original).unwrap();
    let previous_cwd = std::env::current_dir().unwrap();

    std::env::set_current_dir(&original).unwrap();
    approx.save(Path::new("approx.json")).unwrap();
    let snapshot: ApproximatorSnapshot = load_json(Path::new("approx.json")).unwrap().unwrap();
    let blob = &snapshot.persisted.unwrap().blobs[0];
    assert_eq!(
        blob.relative_path.as_deref(),
        Some(Path::new("approx_model.json"))
    );

    std::env::set_current_dir(root.path()).unwrap();
    std::fs::rename(&original, &moved).unwrap();
    std::env::set_current_dir(&moved).unwrap();
    let loaded = Approximator::load(Path::new("approx.json"), &registry, MLP_TAG);
    std::env::set_current_dir(previous_cwd).unwrap();

    let loaded = loaded.unwrap();
    assert!(loaded.is_trained());
    assert_eq!(loaded.epoch_count(), 5);
    let after = loaded.calculate(&[3.0]).unwrap();
    assert!((before[0] - after[0]).abs() < 1e-9);
}
