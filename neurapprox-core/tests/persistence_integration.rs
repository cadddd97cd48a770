//! Save / load round trips on the reference backend, including relocation of
//! the saved directory and damaged blobs.

use std::path::Path;
use std::sync::Arc;

use neurapprox_core::backend::mlp::MLP_TAG;
use neurapprox_core::persistence::{ApproximatorSnapshot, load_json, network_file_paths};
use neurapprox_core::{
    ApproxError, Approximator, ApproximatorConfig, BackendRegistry, BoundingBox, MlpSettings,
    Tolerance, TrainingDataSet, TrainingSettings,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn registry() -> BackendRegistry {
    BackendRegistry::with_defaults(&MlpSettings::default())
}

fn trained(multiple_networks: bool) -> Approximator {
    let mut config = ApproximatorConfig::new(2, 2, vec![6]);
    config.multiple_networks = multiple_networks;
    let mut approx = Approximator::new(
        registry().get(MLP_TAG).unwrap(),
        config,
        TrainingSettings::default(),
    )
    .unwrap();
    let inputs: Vec<Vec<f64>> = (0..20)
        .map(|i| vec![(i % 5) as f64, (i / 5) as f64])
        .collect();
    let data =
        TrainingDataSet::sample(2, 2, inputs, |x| vec![x[0] * x[1], x[0] - 2.0 * x[1]]).unwrap();
    approx
        .set_training_data_with_verification(Arc::new(data), [3, 11])
        .unwrap();
    approx
        .set_rms_tolerance(Tolerance::RelativeVector(vec![0.05, 0.1]))
        .unwrap();
    approx.train_epochs(200).unwrap();
    approx
}

#[test]
fn round_trip_preserves_training_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("approx.json");
    let mut approx = trained(false);
    let before = approx.training_rms_error().unwrap();
    approx.save(&path).unwrap();
    assert!(!approx.flags().needs_save());
    assert!(dir.path().join("approx_model.json").exists());

    let mut loaded = Approximator::load(&path, &registry(), MLP_TAG).unwrap();
    assert!(loaded.is_trained());
    assert_eq!(loaded.epoch_count(), 200);
    assert_eq!(loaded.verification_indices(), approx.verification_indices());
    assert_eq!(loaded.rms_tolerance().representation(), approx.rms_tolerance().representation());
    assert_eq!(loaded.convergence_history().len(), approx.convergence_history().len());

    let after = loaded.training_rms_error().unwrap();
    for (a, b) in before.iter().zip(&after) {
        assert!((a - b).abs() < 1e-6, "before {before:?} after {after:?}");
    }

    // Training continues from the restored weights.
    loaded.train_epochs(10).unwrap();
    assert_eq!(loaded.epoch_count(), 210);
    assert!(loaded.flags().needs_save());
}

#[test]
fn multiple_networks_write_indexed_blobs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("multi.json");
    let mut approx = trained(true);
    let before = approx.calculate(&[2.0, 1.0]).unwrap();
    approx.save(&path).unwrap();

    for blob in network_file_paths(&path, 2, true) {
        assert!(blob.exists(), "{} missing", blob.display());
    }
    let loaded = Approximator::load_any(&path, &registry()).unwrap();
    let after = loaded.calculate(&[2.0, 1.0]).unwrap();
    for (a, b) in before.iter().zip(&after) {
        assert!((a - b).abs() < 1e-9);
    }
}

#[test]
fn relocated_directory_still_loads() {
    let root = TempDir::new().unwrap();
    let original = root.path().join("original");
    let moved = root.path().join("moved");
    let mut approx = trained(false);
    let before = approx.calculate(&[1.0, 3.0]).unwrap();
    approx.save(&original.join("approx.json")).unwrap();

    std::fs::rename(&original, &moved).unwrap();
    assert!(!original.exists());

    let loaded = Approximator::load(&moved.join("approx.json"), &registry(), MLP_TAG).unwrap();
    assert!(loaded.is_trained());
    let persisted = loaded.flags().persisted_paths.clone().unwrap();
    assert!(persisted[0].starts_with(&moved));
    let after = loaded.calculate(&[1.0, 3.0]).unwrap();
    for (a, b) in before.iter().zip(&after) {
        assert!((a - b).abs() < 1e-9);
    }
}

#[test]
fn container_relative_paths_resolve_against_container() {
    let root = TempDir::new().unwrap();
    let container = root.path().join("project").join("project.cfg");
    let snapshot = root.path().join("project").join("nets").join("approx.json");
    let mut approx = trained(false);
    approx.save_in_container(&snapshot, &container).unwrap();

    let saved: ApproximatorSnapshot = load_json(&snapshot).unwrap().unwrap();
    let blob = &saved.persisted.unwrap().blobs[0];
    assert_eq!(
        blob.relative_path.as_deref(),
        Some(Path::new("nets/approx_model.json"))
    );

    let loaded =
        Approximator::load_in_container(&snapshot, &container, &registry(), Some(MLP_TAG))
            .unwrap();
    assert!(loaded.is_trained());
}

#[test]
fn corrupted_blob_loads_untrained() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("approx.json");
    let mut approx = trained(false);
    approx.save(&path).unwrap();
    std::fs::write(dir.path().join("approx_model.json"), b"{ not json").unwrap();

    let loaded = Approximator::load(&path, &registry(), MLP_TAG).unwrap();
    assert!(!loaded.is_trained());
    assert!(!loaded.is_network_prepared());
    assert_eq!(loaded.epoch_count(), 0);
    // Configuration and data survive.
    assert_eq!(loaded.config(), approx.config());
    assert_eq!(loaded.training_data().unwrap().elements().len(), 20);
}

#[test]
fn missing_blob_loads_untrained() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("approx.json");
    trained(false).save(&path).unwrap();
    std::fs::remove_file(dir.path().join("approx_model.json")).unwrap();

    let loaded = Approximator::load(&path, &registry(), MLP_TAG).unwrap();
    assert!(!loaded.is_trained());
}

#[test]
fn wrong_type_tag_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("approx.json");
    trained(false).save(&path).unwrap();

    let err = Approximator::load(&path, &registry(), "svm").unwrap_err();
    match err {
        ApproxError::TypeMismatch { expected, found } => {
            assert_eq!(expected, "svm");
            assert_eq!(found, MLP_TAG);
        }
        other => panic!("unexpected error: {other}"),
    }

    let empty = BackendRegistry::new();
    assert!(matches!(
        Approximator::load_any(&path, &empty),
        Err(ApproxError::UnknownBackend(_))
    ));
}

#[test]
fn untrained_save_has_no_blob() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fresh.json");
    let mut approx = Approximator::new(
        registry().get(MLP_TAG).unwrap(),
        ApproximatorConfig::new(1, 1, vec![2]),
        TrainingSettings::default(),
    )
    .unwrap();
    approx
        .set_input_data_bounds(Some(BoundingBox::uniform(1, -3.0, 3.0)))
        .unwrap();
    approx.save(&path).unwrap();
    assert!(!dir.path().join("fresh_model.json").exists());

    let loaded = Approximator::load(&path, &registry(), MLP_TAG).unwrap();
    assert!(!loaded.is_trained());
    assert_eq!(
        loaded.input_data_bounds(),
        Some(&BoundingBox::uniform(1, -3.0, 3.0))
    );
}
