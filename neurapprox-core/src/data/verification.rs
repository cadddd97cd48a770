//! Verification index set — points held out from fitting.

use crate::error::{ApproxError, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which part of the training data an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subset {
    Training,
    Verification,
}

/// Sorted, unique indices into the training data.
///
/// Always strictly smaller than the data set it refers to, so at least one
/// point remains for training.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationIndexSet {
    indices: BTreeSet<usize>,
}

impl VerificationIndexSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate and build. Duplicates collapse.
    pub fn new(indices: impl IntoIterator<Item = usize>, data_len: usize) -> Result<Self> {
        let set = Self {
            indices: indices.into_iter().collect(),
        };
        set.check(data_len)?;
        Ok(set)
    }

    /// Pick `count` distinct indices at random.
    pub fn random(count: usize, data_len: usize, seed: u64) -> Result<Self> {
        if count >= data_len && count > 0 {
            return Err(ApproxError::data(format!(
                "cannot hold out {count} of {data_len} points"
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let picked = rand::seq::index::sample(&mut rng, data_len, count);
        Self::new(picked.into_iter(), data_len)
    }

    /// Check the set against a data set length.
    pub fn check(&self, data_len: usize) -> Result<()> {
        if !self.indices.is_empty() && self.indices.len() >= data_len {
            return Err(ApproxError::data(format!(
                "verification set size {} must be smaller than training data length {data_len}",
                self.indices.len()
            )));
        }
        if let Some(&last) = self.indices.iter().next_back() {
            if last >= data_len {
                return Err(ApproxError::data(format!(
                    "verification index {last} out of range for {data_len} points"
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.indices.contains(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    /// Indices of `data_len` points belonging to `subset`, in order.
    pub fn select(&self, subset: Subset, data_len: usize) -> Vec<usize> {
        match subset {
            Subset::Verification => self.iter().filter(|&i| i < data_len).collect(),
            Subset::Training => (0..data_len).filter(|i| !self.contains(*i)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_unique() {
        let set = VerificationIndexSet::new([4, 1, 4, 2], 10).unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 2, 4]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_size_must_be_smaller_than_data() {
        assert!(matches!(
            VerificationIndexSet::new([0, 1, 2], 3),
            Err(ApproxError::DataConsistency(_))
        ));
        assert!(VerificationIndexSet::new([0, 1], 3).is_ok());
    }

    #[test]
    fn test_out_of_range() {
        assert!(VerificationIndexSet::new([7], 5).is_err());
    }

    #[test]
    fn test_partition() {
        let set = VerificationIndexSet::new([1, 3], 5).unwrap();
        assert_eq!(set.select(Subset::Training, 5), vec![0, 2, 4]);
        assert_eq!(set.select(Subset::Verification, 5), vec![1, 3]);
    }

    #[test]
    fn test_random_is_reproducible() {
        let a = VerificationIndexSet::random(15, 45, 7).unwrap();
        let b = VerificationIndexSet::random(15, 45, 7).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 15);
        assert!(VerificationIndexSet::random(5, 5, 7).is_err());
    }
}
