//! Time series feature engineering

use crate::error::{EconcastError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// First differences `s[j] - s[j-1]`; one shorter than the series
pub fn differences(series: &[f64]) -> Vec<f64> {
    series.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Mean of the last `window` values ending at `end` (inclusive),
/// truncated at the series start
pub fn trailing_mean(series: &[f64], end: usize, window: usize) -> f64 {
    let start = (end + 1).saturating_sub(window);
    let values = &series[start..=end];
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; 0 for an empty slice
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// Overlapping windows of `lookback + 1` consecutive values.
///
/// Columns `0..lookback` hold the inputs oldest first; the last column is
/// the value that follows them.
pub fn lag_windows(series: &[f64], lookback: usize) -> Result<Array2<f64>> {
    let width = lookback
        .checked_add(1)
        .ok_or_else(|| EconcastError::invalid_parameter("lookback", lookback, "too large"))?;
    if series.len() < width {
        return Err(EconcastError::insufficient(width, series.len()));
    }
    let n_windows = series.len() - lookback;
    Ok(Array2::from_shape_fn((n_windows, width), |(r, c)| series[r + c]))
}

/// Up/down direction features for a series.
///
/// Per index `i` the row is:
///
/// | columns | value |
/// |---|---|
/// | `0..period` | trailing first differences, oldest first, zero-padded |
/// | `period` | moving average over `period` values |
/// | `period + 1` | moving average over `2·period` values |
/// | `period + 2` | population std of the available trailing differences |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionFeatures {
    pub period: usize,
}

impl DirectionFeatures {
    pub fn new(period: usize) -> Self {
        Self { period }
    }

    pub fn n_features(&self) -> usize {
        self.period + 3
    }

    /// Feature names in column order
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = (0..self.period)
            .rev()
            .map(|k| format!("diff_lag_{}", k))
            .collect();
        names.push(format!("ma_{}", self.period));
        names.push(format!("ma_{}", 2 * self.period));
        names.push("volatility".to_string());
        names
    }

    /// Feature row for index `i` of `series`
    pub fn row(&self, series: &[f64], i: usize) -> Result<Vec<f64>> {
        if i >= series.len() {
            return Err(EconcastError::InvalidInput(format!(
                "index {} out of range for series of length {}",
                i,
                series.len()
            )));
        }

        let mut row = Vec::with_capacity(self.n_features());
        let mut available = Vec::with_capacity(self.period);
        // Difference at j is s[j] - s[j-1]; j = 0 has none
        for k in (0..self.period).rev() {
            match i.checked_sub(k) {
                Some(j) if j >= 1 => {
                    let d = series[j] - series[j - 1];
                    available.push(d);
                    row.push(d);
                }
                _ => row.push(0.0),
            }
        }
        row.push(trailing_mean(series, i, self.period));
        row.push(trailing_mean(series, i, 2 * self.period));
        row.push(population_std(&available));
        Ok(row)
    }

    /// Training matrix and next-step direction labels (`1` up, `0` down).
    ///
    /// One row per index `0..len-1`; the final point only serves as a label.
    pub fn transform(&self, series: &[f64]) -> Result<(Array2<f64>, Array1<f64>)> {
        if series.len() < 2 {
            return Err(EconcastError::insufficient(2, series.len()));
        }
        let n_rows = series.len() - 1;
        let mut x = Array2::zeros((n_rows, self.n_features()));
        let mut y = Array1::zeros(n_rows);

        for i in 0..n_rows {
            let row = self.row(series, i)?;
            x.row_mut(i).assign(&Array1::from_vec(row));
            y[i] = if series[i + 1] > series[i] { 1.0 } else { 0.0 };
        }
        Ok((x, y))
    }
}
