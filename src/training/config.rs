//! Hyperparameter configuration for every model family

use crate::error::{EconcastError, Result};
use serde::{Deserialize, Serialize};

use super::random_forest::{JitterConfig, LeafAggregation};

/// Random forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Number of trees
    pub n_estimators: usize,
    /// Maximum depth per tree
    pub max_depth: usize,
    /// Minimum rows to split a node (and per child)
    pub min_samples_split: usize,
    /// Minimum valid rows after filtering
    pub min_valid_rows: usize,
    /// Bootstrap and aggregation policy
    pub aggregation: LeafAggregation,
    /// Multiplicative prediction jitter (regression only, off when `None`)
    pub jitter: Option<JitterConfig>,
    /// Random seed for reproducibility
    pub random_state: Option<u64>,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 2,
            min_valid_rows: 10,
            aggregation: LeafAggregation::RecencyWeightedRegression,
            jitter: None,
            random_state: None,
        }
    }
}

impl ForestConfig {
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_min_samples_split(mut self, n: usize) -> Self {
        self.min_samples_split = n;
        self
    }

    pub fn with_aggregation(mut self, aggregation: LeafAggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_jitter(mut self, jitter: JitterConfig) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(EconcastError::invalid_parameter(
                "n_estimators",
                self.n_estimators,
                "must be at least 1",
            ));
        }
        if self.min_samples_split == 0 {
            return Err(EconcastError::invalid_parameter(
                "min_samples_split",
                self.min_samples_split,
                "must be at least 1",
            ));
        }
        if let Some(j) = &self.jitter {
            j.validate()?;
        }
        Ok(())
    }
}

/// Autoregressive model hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoregressiveConfig {
    /// Number of lagged values used as regressors
    pub lags: usize,
    /// Ridge penalty added to the normal-equation diagonal
    pub lambda: f64,
}

impl Default for AutoregressiveConfig {
    fn default() -> Self {
        Self { lags: 3, lambda: 0.1 }
    }
}

impl AutoregressiveConfig {
    pub fn new(lags: usize) -> Self {
        Self { lags, ..Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.lags == 0 {
            return Err(EconcastError::invalid_parameter("lags", self.lags, "must be at least 1"));
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(EconcastError::invalid_parameter(
                "lambda",
                self.lambda,
                "must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

/// Constrained moving average hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovingAverageConfig {
    /// Trailing window for differences and the short moving average
    pub period: usize,
    /// Trees in the direction classifier
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub random_state: Option<u64>,
}

impl Default for MovingAverageConfig {
    fn default() -> Self {
        Self {
            period: 4,
            n_estimators: 50,
            max_depth: 5,
            min_samples_split: 2,
            random_state: None,
        }
    }
}

impl MovingAverageConfig {
    pub fn new(period: usize) -> Self {
        Self { period, ..Self::default() }
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.period == 0 {
            return Err(EconcastError::invalid_parameter("period", self.period, "must be at least 1"));
        }
        if self.n_estimators == 0 {
            return Err(EconcastError::invalid_parameter(
                "n_estimators",
                self.n_estimators,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Recurrent cell chain hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecurrentConfig {
    /// Number of lagged values, one cell per lag
    pub lookback: usize,
    /// Hidden units per cell
    pub hidden_size: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub random_state: Option<u64>,
}

impl Default for RecurrentConfig {
    fn default() -> Self {
        Self {
            lookback: 4,
            hidden_size: 1,
            epochs: 50,
            batch_size: 16,
            learning_rate: 0.01,
            random_state: Some(42),
        }
    }
}

impl RecurrentConfig {
    pub fn new(lookback: usize, hidden_size: usize) -> Self {
        Self { lookback, hidden_size, ..Self::default() }
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.lookback == 0 {
            return Err(EconcastError::invalid_parameter("lookback", self.lookback, "must be at least 1"));
        }
        if self.hidden_size == 0 {
            return Err(EconcastError::invalid_parameter(
                "hidden_size",
                self.hidden_size,
                "must be at least 1",
            ));
        }
        if self.batch_size == 0 {
            return Err(EconcastError::invalid_parameter(
                "batch_size",
                self.batch_size,
                "must be at least 1",
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(EconcastError::invalid_parameter(
                "learning_rate",
                self.learning_rate,
                "must be finite and positive",
            ));
        }
        Ok(())
    }
}

/// Model family selected by the caller, with its hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ModelSpec {
    RandomForest(ForestConfig),
    Autoregressive(AutoregressiveConfig),
    ConstrainedMovingAverage(MovingAverageConfig),
    Recurrent(RecurrentConfig),
}

impl Default for ModelSpec {
    fn default() -> Self {
        ModelSpec::Autoregressive(AutoregressiveConfig::default())
    }
}

impl ModelSpec {
    /// Parse a spec such as `{"model": "autoregressive", "lags": 2}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: ModelSpec = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ModelSpec::RandomForest(c) => c.validate(),
            ModelSpec::Autoregressive(c) => c.validate(),
            ModelSpec::ConstrainedMovingAverage(c) => c.validate(),
            ModelSpec::Recurrent(c) => c.validate(),
        }
    }

    /// Short family name used in logs
    pub fn family(&self) -> &'static str {
        match self {
            ModelSpec::RandomForest(_) => "random_forest",
            ModelSpec::Autoregressive(_) => "autoregressive",
            ModelSpec::ConstrainedMovingAverage(_) => "constrained_moving_average",
            ModelSpec::Recurrent(_) => "recurrent",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_from_json_partial() {
        let spec = ModelSpec::from_json(r#"{"model": "autoregressive", "lags": 2}"#).unwrap();
        assert_eq!(
            spec,
            ModelSpec::Autoregressive(AutoregressiveConfig { lags: 2, lambda: 0.1 })
        );
    }

    #[test]
    fn test_spec_json_roundtrip_forest() {
        let spec = ModelSpec::RandomForest(
            ForestConfig::default()
                .with_n_estimators(25)
                .with_jitter(JitterConfig::default())
                .with_random_state(9),
        );
        let json = spec.to_json().unwrap();
        assert_eq!(ModelSpec::from_json(&json).unwrap(), spec);
    }

    #[test]
    fn test_spec_rejects_bad_values() {
        assert!(matches!(
            ModelSpec::from_json(r#"{"model": "autoregressive", "lags": 0}"#),
            Err(EconcastError::InvalidParameter { .. })
        ));
        assert!(matches!(
            ModelSpec::from_json(r#"{"model": "nope"}"#),
            Err(EconcastError::ConfigError(_))
        ));
        assert!(RecurrentConfig::new(4, 0).validate().is_err());
        assert!(MovingAverageConfig::new(0).validate().is_err());
    }
}
