//! Persistence manager — JSON snapshots of an approximator plus the backend's
//! own blob files, written next to the snapshot.
//!
//! Saving writes the blobs first and the snapshot last, both through a
//! temp-file-then-rename write, so a snapshot never names a blob that was not
//! written. Restoring a blob is allowed to fail: the approximator comes back
//! configured but untrained.

use crate::approximator::{Approximator, DataBounds};
use crate::backend::BackendRegistry;
use crate::bounds::BoundingBox;
use crate::config::{ApproximatorConfig, TrainingSettings};
use crate::data::{TrainingDataSet, VerificationIndexSet};
use crate::error::{ApproxError, Result};
use crate::state::Invalidation;
use crate::tolerance::Tolerance;
use crate::training::ConvergenceHistory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Version written into every snapshot.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Atomically write JSON data to a file, creating parent directories.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Write `data` to a `.tmp` sibling, then rename over `path`.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load JSON from a file. `Ok(None)` when the file does not exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// SHA-256 of a file's contents, hex encoded.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let content = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Blob file names for a snapshot at `snapshot`: `{stem}_model{ext}` for a
/// single network, `{stem}_model_{i}{ext}` when there is one per output.
pub fn network_file_paths(snapshot: &Path, count: usize, multiple: bool) -> Vec<PathBuf> {
    let stem = snapshot
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = snapshot
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let dir = snapshot.parent().unwrap_or_else(|| Path::new(""));
    if !multiple {
        return vec![dir.join(format!("{stem}_model{ext}"))];
    }
    (0..count)
        .map(|i| dir.join(format!("{stem}_model_{i}{ext}")))
        .collect()
}

/// Path of `to` relative to the directory `from_dir`.
///
/// `None` when the two do not share a root.
pub fn relative_path(from_dir: &Path, to: &Path) -> Option<PathBuf> {
    let from = normalize(&std::path::absolute(from_dir).ok()?);
    let to = normalize(&std::path::absolute(to).ok()?);
    let from: Vec<Component<'_>> = from.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();
    match (from.first(), to.first()) {
        (Some(a), Some(b)) if a == b => {}
        _ => return None,
    }
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();
    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for c in &to[common..] {
        rel.push(c.as_os_str());
    }
    Some(rel)
}

/// Drop `.` and fold `..` into its parent without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// One saved backend blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedBlob {
    pub path: PathBuf,
    /// Relative to the container's directory, when one could be computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<PathBuf>,
    pub sha256: String,
}

impl PersistedBlob {
    /// Candidate locations, container-relative first.
    fn candidates(&self, container_dir: &Path) -> Vec<PathBuf> {
        let mut out = Vec::with_capacity(2);
        if let Some(rel) = &self.relative_path {
            out.push(container_dir.join(rel));
        }
        out.push(self.path.clone());
        out
    }
}

/// Blob locations and digests of a trained approximator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub blobs: Vec<PersistedBlob>,
    pub saved_at: DateTime<Utc>,
}

/// On-disk form of an approximator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproximatorSnapshot {
    pub format_version: u32,
    pub backend: String,
    pub config: ApproximatorConfig,
    pub training: TrainingSettings,
    #[serde(default)]
    pub rms_tolerance: Option<Tolerance>,
    #[serde(default)]
    pub max_tolerance: Option<Tolerance>,
    #[serde(default)]
    pub input_bounds: Option<BoundingBox>,
    #[serde(default)]
    pub input_bounds_explicit: bool,
    #[serde(default)]
    pub output_bounds: Option<BoundingBox>,
    #[serde(default)]
    pub output_bounds_explicit: bool,
    #[serde(default)]
    pub training_data: Option<TrainingDataSet>,
    #[serde(default)]
    pub verification: VerificationIndexSet,
    #[serde(default)]
    pub convergence: ConvergenceHistory,
    #[serde(default)]
    pub epoch_count: usize,
    /// Present only when the approximator was trained at save time.
    #[serde(default)]
    pub persisted: Option<PersistedState>,
}

fn split_bounds(bounds: &Option<DataBounds>) -> (Option<BoundingBox>, bool) {
    match bounds {
        Some(b) => (Some(b.bbox.clone()), b.explicit),
        None => (None, false),
    }
}

fn join_bounds(bbox: Option<BoundingBox>, explicit: bool) -> Option<DataBounds> {
    bbox.map(|bbox| DataBounds { bbox, explicit })
}

/// Absolute directory holding `container`.
fn container_dir(container: &Path) -> io::Result<PathBuf> {
    let container = normalize(&std::path::absolute(container)?);
    Ok(container
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf))
}

impl Approximator {
    /// Save to `path`, using the snapshot file itself as the container.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.save_in_container(path, path)
    }

    /// Save to `path`, recording blob paths relative to `container`'s directory.
    pub fn save_in_container(&mut self, path: &Path, container: &Path) -> Result<()> {
        let persisted = if self.flags.trained && !self.models.is_empty() {
            let dir = container_dir(container)?;
            let paths =
                network_file_paths(path, self.models.len(), self.config.multiple_networks);
            let mut blobs = Vec::with_capacity(paths.len());
            for (model, blob_path) in self.models.iter().zip(&paths) {
                model.save_blob(blob_path)?;
                blobs.push(PersistedBlob {
                    path: std::path::absolute(blob_path)?,
                    relative_path: relative_path(&dir, blob_path),
                    sha256: hash_file(blob_path)?,
                });
            }
            Some(PersistedState {
                blobs,
                saved_at: Utc::now(),
            })
        } else {
            None
        };

        let (input_bounds, input_bounds_explicit) = split_bounds(&self.input_bounds);
        let (output_bounds, output_bounds_explicit) = split_bounds(&self.output_bounds);
        let snapshot = ApproximatorSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            backend: self.factory.tag().to_string(),
            config: self.config.clone(),
            training: self.settings.clone(),
            rms_tolerance: self.rms_tolerance.representation().cloned(),
            max_tolerance: self.max_tolerance.representation().cloned(),
            input_bounds,
            input_bounds_explicit,
            output_bounds,
            output_bounds_explicit,
            training_data: self.data.as_deref().cloned(),
            verification: self.verification.clone(),
            convergence: self.history.clone(),
            epoch_count: self.flags.epoch_count,
            persisted: persisted.clone(),
        };
        atomic_write_json(path, &snapshot)?;

        self.flags.persisted_paths =
            persisted.map(|p| p.blobs.into_iter().map(|b| b.path).collect());
        info!(
            path = %path.display(),
            backend = self.factory.tag(),
            trained = self.flags.trained,
            "Approximator saved"
        );
        Ok(())
    }

    /// Load a snapshot whose backend must be `expected_tag`.
    pub fn load(path: &Path, registry: &BackendRegistry, expected_tag: &str) -> Result<Self> {
        Self::load_in_container(path, path, registry, Some(expected_tag))
    }

    /// Load a snapshot with whichever registered backend it names.
    pub fn load_any(path: &Path, registry: &BackendRegistry) -> Result<Self> {
        Self::load_in_container(path, path, registry, None)
    }

    /// Load from `path`, resolving relative blob paths against `container`'s
    /// directory.
    pub fn load_in_container(
        path: &Path,
        container: &Path,
        registry: &BackendRegistry,
        expected_tag: Option<&str>,
    ) -> Result<Self> {
        let snapshot: ApproximatorSnapshot = load_json(path)?.ok_or_else(|| {
            ApproxError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("snapshot not found: {}", path.display()),
            ))
        })?;
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(ApproxError::data(format!(
                "unsupported snapshot version {}",
                snapshot.format_version
            )));
        }
        if let Some(expected) = expected_tag
            && expected != snapshot.backend
        {
            return Err(ApproxError::TypeMismatch {
                expected: expected.to_string(),
                found: snapshot.backend,
            });
        }
        let factory = registry.get(&snapshot.backend)?;
        let mut approx =
            Approximator::new(factory, snapshot.config.clone(), snapshot.training.clone())?;
        approx.restore_parts(&snapshot)?;

        if let Some(persisted) = &snapshot.persisted {
            let restored = container_dir(container)
                .map_err(ApproxError::from)
                .and_then(|dir| approx.restore_blobs(persisted, &dir));
            match restored {
                Ok(paths) => {
                    approx.flags.trained = true;
                    approx.flags.epoch_count = snapshot.epoch_count;
                    approx.flags.persisted_paths = Some(paths);
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Backend state could not be restored, approximator is untrained"
                    );
                    approx.invalidate(Invalidation::Network);
                }
            }
        }
        info!(
            path = %path.display(),
            backend = approx.backend_tag(),
            trained = approx.is_trained(),
            "Approximator loaded"
        );
        Ok(approx)
    }

    /// Restore everything except backend state.
    fn restore_parts(&mut self, snapshot: &ApproximatorSnapshot) -> Result<()> {
        let output_len = self.config.output_len;
        if let Some(data) = &snapshot.training_data {
            data.check_dimensions(self.config.input_len, output_len)?;
            snapshot.verification.check(data.elements().len())?;
            self.data = Some(Arc::new(data.clone()));
        }
        self.verification = snapshot.verification.clone();
        for (bbox, expected) in [
            (&snapshot.input_bounds, self.config.input_len),
            (&snapshot.output_bounds, output_len),
        ] {
            if let Some(b) = bbox {
                if b.dimension() != expected {
                    return Err(ApproxError::dimension("saved bounds", expected, b.dimension()));
                }
                b.validate()?;
            }
        }
        self.input_bounds =
            join_bounds(snapshot.input_bounds.clone(), snapshot.input_bounds_explicit);
        self.output_bounds =
            join_bounds(snapshot.output_bounds.clone(), snapshot.output_bounds_explicit);
        if let Some(tol) = &snapshot.rms_tolerance {
            self.set_rms_tolerance(tol.clone())?;
        }
        if let Some(tol) = &snapshot.max_tolerance {
            self.set_max_tolerance(tol.clone())?;
        }
        self.history = snapshot.convergence.clone();
        Ok(())
    }

    /// Create the models and load each blob, checking its digest.
    fn restore_blobs(
        &mut self,
        persisted: &PersistedState,
        container_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let expected = self.config.network_count();
        if persisted.blobs.len() != expected {
            return Err(ApproxError::dimension(
                "persisted networks",
                expected,
                persisted.blobs.len(),
            ));
        }
        self.create_models()?;
        let mut resolved = Vec::with_capacity(expected);
        for (model, blob) in self.models.iter_mut().zip(&persisted.blobs) {
            let path = blob
                .candidates(container_dir)
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| {
                    ApproxError::Io(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("network blob not found: {}", blob.path.display()),
                    ))
                })?;
            let digest = hash_file(&path)?;
            if digest != blob.sha256 {
                return Err(ApproxError::data(format!(
                    "digest mismatch for {}",
                    path.display()
                )));
            }
            model.load_blob(&path)?;
            debug!(path = %path.display(), "Network blob restored");
            resolved.push(path);
        }
        Ok(resolved)
    }
}
