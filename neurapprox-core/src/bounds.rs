//! Bounds mapper — affine scaling between a data domain box and a neuron range box.
//!
//! Every dimension is mapped independently with
//! `to_min + (v - from_min) * (to_max - to_min) / (from_max - from_min)`.
//! A zero-width source interval is patched with [`DEGENERATE_WIDTH`] instead of
//! dividing by zero.

use crate::error::{ApproxError, Result};
use serde::{Deserialize, Serialize};

/// Width substituted for a degenerate (zero-length) source interval.
pub const DEGENERATE_WIDTH: f64 = 1e-12;

/// A closed interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn length(&self) -> f64 {
        self.max - self.min
    }

    pub fn center(&self) -> f64 {
        0.5 * (self.min + self.max)
    }

    /// Length used as a divisor; never zero.
    fn divisor(&self) -> f64 {
        let len = self.length();
        if len == 0.0 { DEGENERATE_WIDTH } else { len }
    }
}

/// Axis-aligned per-dimension `(min, max)` intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    intervals: Vec<Interval>,
}

impl BoundingBox {
    pub fn new(intervals: Vec<Interval>) -> Self {
        Self { intervals }
    }

    /// A box with the same interval repeated over `dimension` dimensions.
    pub fn uniform(dimension: usize, min: f64, max: f64) -> Self {
        Self {
            intervals: vec![Interval::new(min, max); dimension],
        }
    }

    /// Build from parallel min/max vectors.
    pub fn from_limits(min: &[f64], max: &[f64]) -> Result<Self> {
        if min.len() != max.len() {
            return Err(ApproxError::dimension("bounding box limits", min.len(), max.len()));
        }
        let bbox = Self {
            intervals: min
                .iter()
                .zip(max)
                .map(|(&lo, &hi)| Interval::new(lo, hi))
                .collect(),
        };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Tight bounding box of a set of points. Fails on an empty set or ragged points.
    pub fn enclosing<'a, I>(points: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a [f64]>,
    {
        let mut iter = points.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| ApproxError::empty("cannot derive bounds from zero points"))?;
        let mut intervals: Vec<Interval> = first.iter().map(|&v| Interval::new(v, v)).collect();
        for point in iter {
            if point.len() != intervals.len() {
                return Err(ApproxError::dimension("point", intervals.len(), point.len()));
            }
            for (interval, &v) in intervals.iter_mut().zip(point) {
                interval.min = interval.min.min(v);
                interval.max = interval.max.max(v);
            }
        }
        Ok(Self { intervals })
    }

    /// Grow every interval by `safety_factor` around its centre.
    ///
    /// A factor below 1.0 would shrink the box and push data outside the
    /// neuron range, so it is rejected.
    pub fn expanded(&self, safety_factor: f64) -> Result<Self> {
        if !safety_factor.is_finite() || safety_factor < 1.0 {
            return Err(ApproxError::invalid_config(format!(
                "safety factor must be >= 1.0, got {safety_factor}"
            )));
        }
        let intervals = self
            .intervals
            .iter()
            .map(|iv| {
                let half = 0.5 * iv.length() * safety_factor;
                let c = iv.center();
                Interval::new(c - half, c + half)
            })
            .collect();
        Ok(Self { intervals })
    }

    pub fn validate(&self) -> Result<()> {
        for (dim, iv) in self.intervals.iter().enumerate() {
            if !iv.min.is_finite() || !iv.max.is_finite() {
                return Err(ApproxError::invalid_config(format!(
                    "non-finite bound in dimension {dim}"
                )));
            }
            if iv.min > iv.max {
                return Err(ApproxError::invalid_config(format!(
                    "min {} exceeds max {} in dimension {dim}",
                    iv.min, iv.max
                )));
            }
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.intervals.len()
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn interval(&self, dim: usize) -> Option<&Interval> {
        self.intervals.get(dim)
    }

    pub fn min(&self) -> Vec<f64> {
        self.intervals.iter().map(|iv| iv.min).collect()
    }

    pub fn max(&self) -> Vec<f64> {
        self.intervals.iter().map(|iv| iv.max).collect()
    }

    /// Per-dimension interval lengths.
    pub fn lengths(&self) -> Vec<f64> {
        self.intervals.iter().map(Interval::length).collect()
    }
}

fn check_dim(from: &BoundingBox, to: &BoundingBox, dim: usize) -> Result<(Interval, Interval)> {
    match (from.interval(dim), to.interval(dim)) {
        (Some(f), Some(t)) => Ok((*f, *t)),
        _ => Err(ApproxError::dimension(
            "mapped dimension",
            from.dimension().min(to.dimension()),
            dim + 1,
        )),
    }
}

fn affine(value: f64, from: Interval, to: Interval) -> f64 {
    to.min + (value - from.min) * to.length() / from.divisor()
}

/// Map `value` in dimension `dim` from `from` into `to`.
pub fn map(value: f64, from: &BoundingBox, to: &BoundingBox, dim: usize) -> Result<f64> {
    let (f, t) = check_dim(from, to, dim)?;
    Ok(affine(value, f, t))
}

/// Inverse of [`map`]: takes a value in `to` back into `from`.
///
/// When the original source interval was degenerate the inverse collapses back
/// onto that single point.
pub fn map_inverse(value: f64, from: &BoundingBox, to: &BoundingBox, dim: usize) -> Result<f64> {
    let (f, t) = check_dim(from, to, dim)?;
    if f.length() == 0.0 {
        return Ok(f.min + (value - t.min) * DEGENERATE_WIDTH / t.divisor());
    }
    Ok(affine(value, t, f))
}

fn check_vector(values: &[f64], from: &BoundingBox, to: &BoundingBox) -> Result<()> {
    if from.dimension() != to.dimension() {
        return Err(ApproxError::dimension(
            "target bounding box",
            from.dimension(),
            to.dimension(),
        ));
    }
    if values.len() != from.dimension() {
        return Err(ApproxError::dimension("mapped vector", from.dimension(), values.len()));
    }
    Ok(())
}

/// Vector form of [`map`].
pub fn map_vector(values: &[f64], from: &BoundingBox, to: &BoundingBox) -> Result<Vec<f64>> {
    check_vector(values, from, to)?;
    Ok(values
        .iter()
        .zip(from.intervals().iter().zip(to.intervals()))
        .map(|(&v, (&f, &t))| affine(v, f, t))
        .collect())
}

/// Vector form of [`map_inverse`].
pub fn map_vector_inverse(
    values: &[f64],
    from: &BoundingBox,
    to: &BoundingBox,
) -> Result<Vec<f64>> {
    check_vector(values, from, to)?;
    values
        .iter()
        .enumerate()
        .map(|(dim, &v)| map_inverse(v, from, to, dim))
        .collect()
}
