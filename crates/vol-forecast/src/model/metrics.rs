//! Regression metrics

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, StockError};

/// Validation metrics of a fitted model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub r2: f64,
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub samples: usize,
}

impl ModelMetrics {
    /// Calculate regression metrics
    ///
    /// R² is 0 when the actual values have no variance.
    pub fn regression(actual: &[f64], predicted: &[f64]) -> Result<Self> {
        let n = actual.len();
        if n != predicted.len() {
            return Err(StockError::InvalidRequest(format!(
                "{n} actual values but {} predictions",
                predicted.len()
            )));
        }
        if n == 0 {
            return Err(StockError::InsufficientData {
                stage: "metrics".to_string(),
                rows: 0,
                required: 1,
            });
        }

        let count = n as f64;
        let (ss_res, abs_sum) = actual
            .iter()
            .zip(predicted)
            .fold((0.0, 0.0), |(sq, abs), (y, p)| {
                (sq + (y - p).powi(2), abs + (y - p).abs())
            });
        let mean = actual.iter().sum::<f64>() / count;
        let ss_tot: f64 = actual.iter().map(|y| (y - mean).powi(2)).sum();

        let mse = ss_res / count;
        Ok(Self {
            r2: if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 },
            mae: abs_sum / count,
            mse,
            rmse: mse.sqrt(),
            samples: n,
        })
    }

    /// Named metric values, as attached to predictions
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("r2".to_string(), self.r2),
            ("mae".to_string(), self.mae),
            ("mse".to_string(), self.mse),
            ("rmse".to_string(), self.rmse),
        ])
    }

    /// Sample-weighted average across folds
    pub fn weighted_mean(folds: &[Self]) -> Option<Self> {
        let total: usize = folds.iter().map(|m| m.samples).sum();
        if total == 0 {
            return None;
        }
        let weight = |m: &Self| m.samples as f64 / total as f64;
        let avg = |f: fn(&Self) -> f64| folds.iter().map(|m| f(m) * weight(m)).sum::<f64>();
        Some(Self {
            r2: avg(|m| m.r2),
            mae: avg(|m| m.mae),
            mse: avg(|m| m.mse),
            rmse: avg(|m| m.mse).sqrt(),
            samples: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let m = ModelMetrics::regression(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(m.r2, 1.0);
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.rmse, 0.0);
        assert_eq!(m.samples, 3);
    }

    #[test]
    fn test_known_values() {
        let m = ModelMetrics::regression(&[1.0, 2.0, 3.0, 4.0], &[2.0, 2.0, 3.0, 2.0]).unwrap();
        assert!((m.mse - 1.25).abs() < 1e-12);
        assert!((m.mae - 0.75).abs() < 1e-12);
        assert!((m.rmse - 1.25f64.sqrt()).abs() < 1e-12);
        assert!((m.r2 - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            ModelMetrics::regression(&[], &[]),
            Err(StockError::InsufficientData { .. })
        ));
        assert!(ModelMetrics::regression(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_map_keys() {
        let m = ModelMetrics::regression(&[1.0, 2.0], &[1.5, 2.5]).unwrap();
        let map = m.to_map();
        assert_eq!(
            map.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["mae", "mse", "r2", "rmse"]
        );
    }

    #[test]
    fn test_weighted_mean() {
        let a = ModelMetrics { r2: 0.5, mae: 1.0, mse: 1.0, rmse: 1.0, samples: 1 };
        let b = ModelMetrics { r2: 0.8, mae: 2.0, mse: 4.0, rmse: 2.0, samples: 3 };
        let m = ModelMetrics::weighted_mean(&[a, b]).unwrap();
        assert!((m.r2 - 0.725).abs() < 1e-12);
        assert!((m.mse - 3.25).abs() < 1e-12);
        assert_eq!(m.samples, 4);
        assert!(ModelMetrics::weighted_mean(&[]).is_none());
    }
}
