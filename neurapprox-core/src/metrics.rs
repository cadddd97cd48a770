//! Error evaluator — per-dimension approximation error over a point set.

use crate::error::{ApproxError, Result};
use serde::{Deserialize, Serialize};

/// Which error measure to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMeasure {
    Rms,
    Max,
    MeanAbs,
}

fn check<P, C>(prescribed: &[P], calculated: &[C], output_len: usize) -> Result<()>
where
    P: AsRef<[f64]>,
    C: AsRef<[f64]>,
{
    if prescribed.is_empty() {
        return Err(ApproxError::empty("error evaluation needs at least one point"));
    }
    if prescribed.len() != calculated.len() {
        return Err(ApproxError::dimension(
            "calculated outputs",
            prescribed.len(),
            calculated.len(),
        ));
    }
    let lengths = prescribed
        .iter()
        .map(|v| v.as_ref().len())
        .chain(calculated.iter().map(|v| v.as_ref().len()));
    for len in lengths {
        if len != output_len {
            return Err(ApproxError::dimension("output vector", output_len, len));
        }
    }
    Ok(())
}

/// Fold `f(|diff|)` per dimension over all points.
fn fold_abs<P, C, F>(prescribed: &[P], calculated: &[C], output_len: usize, mut f: F) -> Vec<f64>
where
    P: AsRef<[f64]>,
    C: AsRef<[f64]>,
    F: FnMut(f64, f64) -> f64,
{
    let mut acc = vec![0.0; output_len];
    for (p, c) in prescribed.iter().zip(calculated) {
        for ((a, &pv), &cv) in acc.iter_mut().zip(p.as_ref()).zip(c.as_ref()) {
            *a = f(*a, (pv - cv).abs());
        }
    }
    acc
}

/// Per-dimension root-mean-square error.
pub fn rms<P, C>(prescribed: &[P], calculated: &[C], output_len: usize) -> Result<Vec<f64>>
where
    P: AsRef<[f64]>,
    C: AsRef<[f64]>,
{
    check(prescribed, calculated, output_len)?;
    let n = prescribed.len() as f64;
    Ok(fold_abs(prescribed, calculated, output_len, |a, d| a + d * d)
        .into_iter()
        .map(|s| (s / n).sqrt())
        .collect())
}

/// Per-dimension maximum absolute error. A NaN difference propagates.
pub fn max_abs<P, C>(prescribed: &[P], calculated: &[C], output_len: usize) -> Result<Vec<f64>>
where
    P: AsRef<[f64]>,
    C: AsRef<[f64]>,
{
    check(prescribed, calculated, output_len)?;
    Ok(fold_abs(prescribed, calculated, output_len, |a, d| {
        if d.is_nan() || d > a { d } else { a }
    }))
}

/// Per-dimension mean absolute error.
pub fn mean_abs<P, C>(prescribed: &[P], calculated: &[C], output_len: usize) -> Result<Vec<f64>>
where
    P: AsRef<[f64]>,
    C: AsRef<[f64]>,
{
    check(prescribed, calculated, output_len)?;
    let n = prescribed.len() as f64;
    Ok(fold_abs(prescribed, calculated, output_len, |a, d| a + d)
        .into_iter()
        .map(|s| s / n)
        .collect())
}

/// Dispatch on an [`ErrorMeasure`].
pub fn evaluate<P, C>(
    measure: ErrorMeasure,
    prescribed: &[P],
    calculated: &[C],
    output_len: usize,
) -> Result<Vec<f64>>
where
    P: AsRef<[f64]>,
    C: AsRef<[f64]>,
{
    match measure {
        ErrorMeasure::Rms => rms(prescribed, calculated, output_len),
        ErrorMeasure::Max => max_abs(prescribed, calculated, output_len),
        ErrorMeasure::MeanAbs => mean_abs(prescribed, calculated, output_len),
    }
}

/// All three error vectors for one subset of the training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub points: usize,
    pub rms: Vec<f64>,
    pub max: Vec<f64>,
    pub mean_abs: Vec<f64>,
}

impl ErrorSummary {
    pub fn compute<P, C>(prescribed: &[P], calculated: &[C], output_len: usize) -> Result<Self>
    where
        P: AsRef<[f64]>,
        C: AsRef<[f64]>,
    {
        Ok(Self {
            points: prescribed.len(),
            rms: rms(prescribed, calculated, output_len)?,
            max: max_abs(prescribed, calculated, output_len)?,
            mean_abs: mean_abs(prescribed, calculated, output_len)?,
        })
    }
}
