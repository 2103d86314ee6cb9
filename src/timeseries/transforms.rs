//! Time series transformations

use crate::error::{EconcastError, Result};
use serde::{Deserialize, Serialize};

/// Z-score normalization statistics captured at fit time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: f64,
    /// Population std; replaced by 1 when zero or non-finite
    pub std: f64,
}

impl Default for Normalization {
    fn default() -> Self {
        Self { mean: 0.0, std: 1.0 }
    }
}

impl Normalization {
    /// Estimate mean and std from a non-empty series
    pub fn fit(series: &[f64]) -> Result<Self> {
        if series.is_empty() {
            return Err(EconcastError::insufficient(1, 0));
        }
        let n = series.len() as f64;
        let mean = series.iter().sum::<f64>() / n;
        if !mean.is_finite() {
            return Err(EconcastError::NumericFailure(
                "series mean is not finite".to_string(),
            ));
        }
        let std = (series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        let std = if std.is_finite() && std > 0.0 { std } else { 1.0 };
        Ok(Self { mean, std })
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.mean) / self.std
    }

    pub fn transform_all(&self, series: &[f64]) -> Vec<f64> {
        series.iter().map(|&v| self.transform(v)).collect()
    }

    pub fn inverse(&self, value: f64) -> f64 {
        value * self.std + self.mean
    }
}
