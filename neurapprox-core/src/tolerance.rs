//! Tolerance resolver — absolute vs. range-relative error tolerances.
//!
//! A tolerance family (RMS or Max) has exactly one authoritative
//! representation at a time. The absolute vector the stop criteria compare
//! against is derived from it and the current output data range.

use crate::bounds::BoundingBox;
use crate::error::{ApproxError, Result};
use serde::{Deserialize, Serialize};

/// Which error measure a tolerance applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceKind {
    Rms,
    Max,
}

impl std::fmt::Display for ToleranceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToleranceKind::Rms => write!(f, "rms"),
            ToleranceKind::Max => write!(f, "max"),
        }
    }
}

/// Authoritative tolerance representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum Tolerance {
    /// Absolute tolerance per output dimension.
    Absolute(Vec<f64>),
    /// Fraction of each output dimension's data range.
    RelativeVector(Vec<f64>),
    /// One fraction broadcast over all output dimensions.
    RelativeScalar(f64),
}

impl Tolerance {
    pub fn is_relative(&self) -> bool {
        !matches!(self, Tolerance::Absolute(_))
    }

    /// Resolve to an absolute per-dimension vector.
    ///
    /// Relative forms need the output data range; `None` fails with
    /// `InvalidConfiguration`.
    pub fn resolve(
        &self,
        output_len: usize,
        output_bounds: Option<&BoundingBox>,
    ) -> Result<Vec<f64>> {
        let relative = match self {
            Tolerance::Absolute(abs) => return Ok(abs.clone()),
            Tolerance::RelativeVector(rel) => rel.clone(),
            Tolerance::RelativeScalar(s) => vec![*s; output_len],
        };
        let bounds = output_bounds.ok_or_else(|| {
            ApproxError::invalid_config(
                "relative tolerance requires output data bounds to be defined",
            )
        })?;
        if bounds.dimension() != relative.len() {
            return Err(ApproxError::dimension(
                "output data bounds",
                relative.len(),
                bounds.dimension(),
            ));
        }
        Ok(relative
            .iter()
            .zip(bounds.lengths())
            .map(|(r, len)| r * len)
            .collect())
    }
}

/// One tolerance family together with its resolved absolute vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToleranceSpec {
    kind: ToleranceKind,
    representation: Option<Tolerance>,
    #[serde(skip)]
    absolute: Option<Vec<f64>>,
}

impl ToleranceSpec {
    pub fn new(kind: ToleranceKind) -> Self {
        Self {
            kind,
            representation: None,
            absolute: None,
        }
    }

    pub fn kind(&self) -> ToleranceKind {
        self.kind
    }

    pub fn representation(&self) -> Option<&Tolerance> {
        self.representation.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.representation.is_some()
    }

    /// True only while the absolute vector is authoritative.
    pub fn is_absolute(&self) -> bool {
        matches!(self.representation, Some(Tolerance::Absolute(_)))
    }

    /// The relative vector, when a relative form is authoritative.
    pub fn relative_vector(&self, output_len: usize) -> Option<Vec<f64>> {
        match &self.representation {
            Some(Tolerance::RelativeVector(v)) => Some(v.clone()),
            Some(Tolerance::RelativeScalar(s)) => Some(vec![*s; output_len]),
            _ => None,
        }
    }

    /// The relative scalar, when it is authoritative.
    pub fn relative_scalar(&self) -> Option<f64> {
        match self.representation {
            Some(Tolerance::RelativeScalar(s)) => Some(s),
            _ => None,
        }
    }

    /// Cached absolute vector, if resolved.
    pub fn cached_absolute(&self) -> Option<&[f64]> {
        self.absolute.as_deref()
    }

    /// Absolute tolerance vector, resolving lazily when not cached.
    pub fn absolute_vector(
        &mut self,
        output_len: usize,
        output_bounds: Option<&BoundingBox>,
    ) -> Result<Option<Vec<f64>>> {
        let Some(repr) = &self.representation else {
            return Ok(None);
        };
        if let Some(abs) = &self.absolute {
            return Ok(Some(abs.clone()));
        }
        let abs = repr.resolve(output_len, output_bounds)?;
        self.absolute = Some(abs.clone());
        Ok(Some(abs))
    }

    /// Replace the representation. Relative forms are resolved right away when
    /// bounds are known, otherwise on first read.
    pub fn set(
        &mut self,
        tolerance: Tolerance,
        output_len: usize,
        output_bounds: Option<&BoundingBox>,
    ) -> Result<()> {
        validate(&tolerance, output_len, self.kind)?;
        let absolute = match &tolerance {
            Tolerance::Absolute(v) => Some(v.clone()),
            relative => match output_bounds {
                Some(b) => Some(relative.resolve(output_len, Some(b))?),
                None => None,
            },
        };
        self.representation = Some(tolerance);
        self.absolute = absolute;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.representation = None;
        self.absolute = None;
    }

    /// Recompute a relative tolerance after the output range changed.
    pub fn rebase(&mut self, output_len: usize, output_bounds: Option<&BoundingBox>) {
        let Some(repr) = &self.representation else {
            return;
        };
        if !repr.is_relative() {
            return;
        }
        self.absolute = output_bounds.and_then(|b| repr.resolve(output_len, Some(b)).ok());
    }

    /// Re-validate against a new output length. Returns `false` when the
    /// stored tolerance no longer fits and was dropped.
    pub fn retain_if_compatible(&mut self, output_len: usize) -> bool {
        match &self.representation {
            Some(repr) if validate(repr, output_len, self.kind).is_err() => {
                self.clear();
                false
            }
            _ => true,
        }
    }
}

fn validate(tolerance: &Tolerance, output_len: usize, label: ToleranceKind) -> Result<()> {
    let values: &[f64] = match tolerance {
        Tolerance::Absolute(v) | Tolerance::RelativeVector(v) => {
            if v.len() != output_len {
                return Err(ApproxError::dimension(
                    format!("{label} tolerance vector"),
                    output_len,
                    v.len(),
                ));
            }
            v
        }
        Tolerance::RelativeScalar(s) => std::slice::from_ref(s),
    };
    if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(ApproxError::invalid_config(format!(
            "{label} tolerance components must be finite and non-negative"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> BoundingBox {
        BoundingBox::from_limits(&[0.0, -1.0], &[10.0, 1.0]).unwrap()
    }

    #[test]
    fn test_absolute_is_exclusive() {
        let mut spec = ToleranceSpec::new(ToleranceKind::Rms);
        spec.set(Tolerance::RelativeScalar(0.1), 2, None).unwrap();
        spec.set(Tolerance::Absolute(vec![0.5, 0.5]), 2, None)
            .unwrap();
        assert!(spec.is_absolute());
        assert!(spec.relative_vector(2).is_none());
        assert!(spec.relative_scalar().is_none());
    }

    #[test]
    fn test_relative_vector_resolves_against_range() {
        let b = bounds();
        let mut spec = ToleranceSpec::new(ToleranceKind::Max);
        spec.set(Tolerance::RelativeVector(vec![0.1, 0.5]), 2, Some(&b))
            .unwrap();
        assert!(!spec.is_absolute());
        assert!(spec.relative_scalar().is_none());
        assert_eq!(spec.cached_absolute(), Some(&[1.0, 1.0][..]));
    }

    #[test]
    fn test_scalar_broadcasts() {
        let b = bounds();
        let mut spec = ToleranceSpec::new(ToleranceKind::Rms);
        spec.set(Tolerance::RelativeScalar(0.01), 2, None).unwrap();
        assert_eq!(spec.relative_vector(2), Some(vec![0.01, 0.01]));
        assert_eq!(spec.cached_absolute(), None);
        let abs = spec.absolute_vector(2, Some(&b)).unwrap().unwrap();
        assert!((abs[0] - 0.1).abs() < 1e-12);
        assert!((abs[1] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_relative_without_bounds_fails_on_read() {
        let mut spec = ToleranceSpec::new(ToleranceKind::Rms);
        spec.set(Tolerance::RelativeScalar(0.01), 1, None).unwrap();
        assert!(matches!(
            spec.absolute_vector(1, None),
            Err(ApproxError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_length_validated() {
        let mut spec = ToleranceSpec::new(ToleranceKind::Rms);
        let err = spec
            .set(Tolerance::Absolute(vec![0.1]), 2, None)
            .unwrap_err();
        assert!(matches!(err, ApproxError::DimensionMismatch { .. }));
        assert!(!spec.is_set());
    }

    #[test]
    fn test_rebase_follows_new_range() {
        let mut spec = ToleranceSpec::new(ToleranceKind::Rms);
        spec.set(Tolerance::RelativeScalar(0.5), 2, Some(&bounds()))
            .unwrap();
        let wider = BoundingBox::from_limits(&[0.0, -2.0], &[20.0, 2.0]).unwrap();
        spec.rebase(2, Some(&wider));
        assert_eq!(spec.cached_absolute(), Some(&[10.0, 2.0][..]));
    }

    #[test]
    fn test_rebase_leaves_absolute_alone() {
        let mut spec = ToleranceSpec::new(ToleranceKind::Rms);
        spec.set(Tolerance::Absolute(vec![0.3, 0.4]), 2, None)
            .unwrap();
        spec.rebase(2, Some(&bounds()));
        assert_eq!(spec.cached_absolute(), Some(&[0.3, 0.4][..]));
    }

    #[test]
    fn test_negative_rejected() {
        let mut spec = ToleranceSpec::new(ToleranceKind::Max);
        assert!(spec.set(Tolerance::RelativeScalar(-0.1), 1, None).is_err());
    }
}
