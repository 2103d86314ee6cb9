//! Ridge-regularized linear autoregressive model
//!
//! Regresses `y_t` on `[1, y_{t-1}, …, y_{t-lags}]` and solves the
//! regularized normal equations `(XᵗX + λI)β = Xᵗy` with partial-pivot
//! Gaussian elimination. The penalty covers the bias term too.

use crate::error::{EconcastError, Result};
use crate::linalg::{ridge_normal_equations, solve};
use crate::utils::{check_feature_vector, finite_series};
use super::config::AutoregressiveConfig;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Linear autoregressive forecaster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoregressiveModel {
    /// Number of lagged values
    pub lags: usize,
    /// Ridge penalty
    pub lambda: f64,
    /// `[bias, β₁ … β_lags]`, `β₁` weighting the most recent value
    coefficients: Option<Array1<f64>>,
}

impl Default for AutoregressiveModel {
    fn default() -> Self {
        Self::from_config(&AutoregressiveConfig::default())
    }
}

impl AutoregressiveModel {
    pub fn new(lags: usize) -> Self {
        Self::from_config(&AutoregressiveConfig::new(lags))
    }

    pub fn from_config(config: &AutoregressiveConfig) -> Self {
        Self {
            lags: config.lags,
            lambda: config.lambda,
            coefficients: None,
        }
    }

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    /// Fit on a chronological series; non-finite points are dropped first.
    pub fn fit(&mut self, series: &[f64]) -> Result<&mut Self> {
        self.coefficients = None;
        AutoregressiveConfig { lags: self.lags, lambda: self.lambda }.validate()?;
        let required = self
            .lags
            .checked_add(1)
            .ok_or_else(|| EconcastError::invalid_parameter("lags", self.lags, "too large"))?;

        let clean = finite_series(series);
        let n = clean.len();
        if n < required {
            return Err(EconcastError::insufficient(required, n));
        }

        let n_rows = n - self.lags;
        let x = Array2::from_shape_fn((n_rows, self.lags + 1), |(r, c)| {
            let t = r + self.lags;
            if c == 0 {
                1.0
            } else {
                clean[t - c]
            }
        });
        let y = Array1::from_shape_fn(n_rows, |r| clean[r + self.lags]);

        let (xtx, xty) = ridge_normal_equations(&x, &y, self.lambda)?;
        let beta = solve(&xtx, &xty)?;
        if beta.iter().any(|b| !b.is_finite()) {
            return Err(EconcastError::NumericFailure(
                "autoregressive coefficients are not finite".to_string(),
            ));
        }

        debug!(
            lags = self.lags,
            n_rows,
            dropped_points = series.len() - n,
            bias = beta[0],
            "autoregressive model fitted"
        );
        self.coefficients = Some(beta);
        Ok(self)
    }

    /// One-step prediction from the last `lags` values, oldest first.
    pub fn predict(&self, last_values: &[f64]) -> Result<f64> {
        let beta = self.coefficients.as_ref().ok_or(EconcastError::ModelNotFitted)?;
        // Coefficients fix the lag count even if `lags` was edited since fit
        check_feature_vector(last_values, beta.len() - 1)?;

        let value = beta[0]
            + last_values
                .iter()
                .rev()
                .zip(beta.iter().skip(1))
                .map(|(v, b)| v * b)
                .sum::<f64>();

        if !value.is_finite() {
            return Err(EconcastError::NumericFailure(format!(
                "autoregressive prediction is not finite ({})",
                value
            )));
        }
        Ok(value)
    }

    /// Predict the value following `series` from its finite tail.
    pub fn predict_next(&self, series: &[f64]) -> Result<f64> {
        let lags = self
            .coefficients
            .as_ref()
            .ok_or(EconcastError::ModelNotFitted)?
            .len()
            - 1;
        let clean = finite_series(series);
        if clean.len() < lags {
            return Err(EconcastError::insufficient(lags, clean.len()));
        }
        self.predict(&clean[clean.len() - lags..])
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coefficients.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.coefficients.is_some()
    }
}
