//! Sampled training data and the read surface the engine consumes.

use crate::bounds::BoundingBox;
use crate::error::{ApproxError, Result};
use serde::{Deserialize, Serialize};

/// Minimal read surface of a sampled-data container.
pub trait TrainingDataSource: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn input_len(&self) -> usize;

    fn output_len(&self) -> usize;

    fn input(&self, index: usize) -> Option<&[f64]>;

    fn output(&self, index: usize) -> Option<&[f64]>;

    /// Tight bounding box of all inputs.
    fn input_range(&self) -> Result<BoundingBox> {
        BoundingBox::enclosing((0..self.len()).filter_map(|i| self.input(i)))
    }

    /// Tight bounding box of all outputs.
    fn output_range(&self) -> Result<BoundingBox> {
        BoundingBox::enclosing((0..self.len()).filter_map(|i| self.output(i)))
    }
}

/// One sampled point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataElement {
    pub input: Vec<f64>,
    pub output: Vec<f64>,
}

/// In-memory ordered set of sampled points with fixed dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingDataSet {
    input_len: usize,
    output_len: usize,
    elements: Vec<DataElement>,
}

impl TrainingDataSet {
    pub fn new(input_len: usize, output_len: usize) -> Self {
        Self {
            input_len,
            output_len,
            elements: Vec::new(),
        }
    }

    /// Build from parallel input/output vectors.
    pub fn from_pairs(
        input_len: usize,
        output_len: usize,
        pairs: impl IntoIterator<Item = (Vec<f64>, Vec<f64>)>,
    ) -> Result<Self> {
        let mut data = Self::new(input_len, output_len);
        for (input, output) in pairs {
            data.push(input, output)?;
        }
        Ok(data)
    }

    /// Sample `f` at every input point.
    pub fn sample<F>(
        input_len: usize,
        output_len: usize,
        inputs: impl IntoIterator<Item = Vec<f64>>,
        mut f: F,
    ) -> Result<Self>
    where
        F: FnMut(&[f64]) -> Vec<f64>,
    {
        Self::from_pairs(
            input_len,
            output_len,
            inputs.into_iter().map(|x| {
                let y = f(&x);
                (x, y)
            }),
        )
    }

    pub fn push(&mut self, input: Vec<f64>, output: Vec<f64>) -> Result<()> {
        if input.len() != self.input_len {
            return Err(ApproxError::dimension("input vector", self.input_len, input.len()));
        }
        if output.len() != self.output_len {
            return Err(ApproxError::dimension(
                "output vector",
                self.output_len,
                output.len(),
            ));
        }
        if input.iter().chain(&output).any(|v| !v.is_finite()) {
            return Err(ApproxError::data("training data contains non-finite values"));
        }
        self.elements.push(DataElement { input, output });
        Ok(())
    }

    pub fn elements(&self) -> &[DataElement] {
        &self.elements
    }

    pub fn element(&self, index: usize) -> Option<&DataElement> {
        self.elements.get(index)
    }

    /// Validate against the dimensions an approximator is configured for.
    pub fn check_dimensions(&self, input_len: usize, output_len: usize) -> Result<()> {
        if self.input_len != input_len {
            return Err(ApproxError::dimension(
                "training data input length",
                input_len,
                self.input_len,
            ));
        }
        if self.output_len != output_len {
            return Err(ApproxError::dimension(
                "training data output length",
                output_len,
                self.output_len,
            ));
        }
        Ok(())
    }
}

impl TrainingDataSource for TrainingDataSet {
    fn len(&self) -> usize {
        self.elements.len()
    }

    fn input_len(&self) -> usize {
        self.input_len
    }

    fn output_len(&self) -> usize {
        self.output_len
    }

    fn input(&self, index: usize) -> Option<&[f64]> {
        self.elements.get(index).map(|e| e.input.as_slice())
    }

    fn output(&self, index: usize) -> Option<&[f64]> {
        self.elements.get(index).map(|e| e.output.as_slice())
    }
}
