//! Constrained moving average model
//!
//! A classification forest picks the next-step direction from difference,
//! moving-average and volatility features; the step size is the magnitude
//! of the mean trailing difference. The forecast therefore always moves by
//! exactly `ma_change` from the last observation.

use crate::error::{EconcastError, Result};
use crate::timeseries::{differences, DirectionFeatures};
use crate::utils::finite_series;
use super::config::{ForestConfig, MovingAverageConfig};
use super::random_forest::{LeafAggregation, RandomForest};
use serde::{Deserialize, Serialize};
use tracing::debug;

const UP: f64 = 1.0;
const DOWN: f64 = 0.0;

/// Predicted direction of the next step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// Output of [`ConstrainedMovingAverageModel::predict`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingAverageForecast {
    pub prediction: f64,
    pub direction: Direction,
    /// Forest probability of the chosen direction
    pub confidence: f64,
    /// `|mean of the trailing period differences|`
    pub ma_change: f64,
}

#[derive(Debug)]
pub struct ConstrainedMovingAverageModel {
    features: DirectionFeatures,
    config: MovingAverageConfig,
    forest: RandomForest,
}

impl Default for ConstrainedMovingAverageModel {
    fn default() -> Self {
        Self::from_config(&MovingAverageConfig::default())
    }
}

impl ConstrainedMovingAverageModel {
    pub fn new(period: usize) -> Self {
        Self::from_config(&MovingAverageConfig::new(period))
    }

    pub fn from_config(config: &MovingAverageConfig) -> Self {
        Self {
            features: DirectionFeatures::new(config.period),
            config: config.clone(),
            forest: Self::build_forest(config),
        }
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.config.random_state = Some(seed);
        self.forest.random_state = Some(seed);
        self
    }

    fn build_forest(config: &MovingAverageConfig) -> RandomForest {
        let mut forest_config = ForestConfig::default()
            .with_n_estimators(config.n_estimators)
            .with_max_depth(config.max_depth)
            .with_min_samples_split(config.min_samples_split)
            .with_aggregation(LeafAggregation::Classification);
        forest_config.min_valid_rows = 1;
        forest_config.random_state = config.random_state;
        RandomForest::from_config(&forest_config)
    }

    pub fn period(&self) -> usize {
        self.config.period
    }

    /// The internal direction classifier
    pub fn forest(&self) -> &RandomForest {
        &self.forest
    }

    fn clean_series(&self, series: &[f64]) -> Result<Vec<f64>> {
        let clean = finite_series(series);
        let period = self.config.period;
        let required = period
            .checked_add(1)
            .ok_or_else(|| EconcastError::invalid_parameter("period", period, "too large"))?;
        if clean.len() < required {
            return Err(EconcastError::insufficient(required, clean.len()));
        }
        Ok(clean)
    }

    /// Train the direction classifier on a chronological series
    pub fn fit(&mut self, series: &[f64]) -> Result<&mut Self> {
        self.forest = Self::build_forest(&self.config);
        self.config.validate()?;
        let clean = self.clean_series(series)?;

        let (x, y) = self.features.transform(&clean)?;
        let ups = y.iter().filter(|&&label| label == UP).count();
        self.forest.fit(&x, &y)?;

        debug!(
            period = self.config.period,
            n_rows = x.nrows(),
            up_labels = ups,
            "constrained moving average fitted"
        );
        Ok(self)
    }

    /// Forecast the value after the last point of `series`
    pub fn predict(&self, series: &[f64]) -> Result<MovingAverageForecast> {
        if !self.forest.is_fitted() {
            return Err(EconcastError::ModelNotFitted);
        }
        let clean = self.clean_series(series)?;
        let last_idx = clean.len() - 1;
        let last = clean[last_idx];

        let row = self.features.row(&clean, last_idx)?;
        let proba = self.forest.predict_proba_row(&row)?;
        let probability_of = |class: f64| {
            self.forest
                .classes()
                .iter()
                .position(|&c| c == class)
                .map_or(0.0, |k| proba[k])
        };
        let p_up = probability_of(UP);
        let p_down = probability_of(DOWN);

        let (direction, confidence) = if p_up >= p_down {
            (Direction::Up, p_up)
        } else {
            (Direction::Down, p_down)
        };

        let diffs = differences(&clean);
        let trailing = &diffs[diffs.len() - self.config.period..];
        let ma_change = (trailing.iter().sum::<f64>() / trailing.len() as f64).abs();

        let prediction = match direction {
            Direction::Up => last + ma_change,
            Direction::Down => last - ma_change,
        };
        if !prediction.is_finite() {
            return Err(EconcastError::NumericFailure(format!(
                "moving average prediction is not finite ({})",
                prediction
            )));
        }

        Ok(MovingAverageForecast {
            prediction,
            direction,
            confidence,
            ma_change,
        })
    }
}
