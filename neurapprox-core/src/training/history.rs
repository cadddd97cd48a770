//! Convergence history recorded once per bundle.

use serde::{Deserialize, Serialize};

/// Error snapshot taken after a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceRecord {
    pub epoch: usize,
    pub train_rms: Vec<f64>,
    pub train_max: Vec<f64>,
    /// Absent when there are no verification points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_rms: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_max: Option<Vec<f64>>,
}

/// Append-only list of convergence records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceHistory {
    records: Vec<ConvergenceRecord>,
}

impl ConvergenceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ConvergenceRecord) {
        self.records.push(record);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn records(&self) -> &[ConvergenceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&ConvergenceRecord> {
        self.records.last()
    }

    /// Epoch with the lowest summed RMS error, preferring verification error
    /// when it was recorded.
    pub fn best_epoch(&self) -> Option<usize> {
        self.records
            .iter()
            .map(|r| {
                let rms = r.verify_rms.as_ref().unwrap_or(&r.train_rms);
                (r.epoch, rms.iter().sum::<f64>())
            })
            .filter(|(_, score)| !score.is_nan())
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(epoch, _)| epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, train: f64, verify: Option<f64>) -> ConvergenceRecord {
        ConvergenceRecord {
            epoch,
            train_rms: vec![train],
            train_max: vec![train],
            verify_rms: verify.map(|v| vec![v]),
            verify_max: verify.map(|v| vec![v]),
        }
    }

    #[test]
    fn test_best_epoch_prefers_verification() {
        let mut history = ConvergenceHistory::new();
        history.push(record(100, 0.5, Some(0.4)));
        history.push(record(200, 0.1, Some(0.6)));
        assert_eq!(history.best_epoch(), Some(100));

        let mut train_only = ConvergenceHistory::new();
        train_only.push(record(100, 0.5, None));
        train_only.push(record(200, 0.1, None));
        assert_eq!(train_only.best_epoch(), Some(200));
    }

    #[test]
    fn test_serialization_omits_missing_verification() {
        let json = serde_json::to_string(&record(10, 0.2, None)).unwrap();
        assert!(!json.contains("verify_rms"));
        let back: ConvergenceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.verify_max, None);
    }
}
