//! Forecast engine implementation

use crate::error::{EconcastError, Result};
use crate::training::{
    AutoregressiveModel, ConstrainedMovingAverageModel, Direction, ModelSpec, RandomForest,
    RecurrentCellChain,
};
use super::dataset::Dataset;
use ndarray::{s, Array1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Family-specific output accompanying a prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostics {
    /// Permutation importance aligned to `features`
    Importance { features: Vec<String>, importance: Vec<f64> },
    /// `[bias, β₁ … β_lags]`
    Coefficients { coefficients: Vec<f64> },
    Direction { direction: Direction, confidence: f64, ma_change: f64 },
    None,
}

/// One-step forecast for a single target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub target: String,
    pub prediction: f64,
    pub diagnostics: Diagnostics,
}

/// A target that could not be forecast
#[derive(Debug)]
pub struct Failure {
    pub target: String,
    pub error: EconcastError,
}

/// Outcome of [`ForecastEngine::forecast_all`]
#[derive(Debug, Default)]
pub struct BatchReport {
    pub forecasts: Vec<Forecast>,
    pub failures: Vec<Failure>,
}

/// Walk-forward predictions from [`ForecastEngine::rolling_forecast`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingForecast {
    /// `(index, prediction)` for every index in `start..len`
    pub predictions: Vec<(usize, f64)>,
    /// Number of fits performed
    pub refits: usize,
}

/// Fitted single-series model
enum SeriesModel {
    Autoregressive(AutoregressiveModel),
    MovingAverage(ConstrainedMovingAverageModel),
    Recurrent(RecurrentCellChain),
}

impl SeriesModel {
    fn fit(spec: &ModelSpec, series: &[f64]) -> Result<Self> {
        match spec {
            ModelSpec::Autoregressive(config) => {
                let mut model = AutoregressiveModel::from_config(config);
                model.fit(series)?;
                Ok(SeriesModel::Autoregressive(model))
            }
            ModelSpec::ConstrainedMovingAverage(config) => {
                let mut model = ConstrainedMovingAverageModel::from_config(config);
                model.fit(series)?;
                Ok(SeriesModel::MovingAverage(model))
            }
            ModelSpec::Recurrent(config) => {
                let mut model = RecurrentCellChain::from_config(config);
                model.fit(series)?;
                Ok(SeriesModel::Recurrent(model))
            }
            ModelSpec::RandomForest(_) => Err(EconcastError::InvalidInput(
                "random forest forecasts need peer variables".to_string(),
            )),
        }
    }

    fn predict(&self, history: &[f64]) -> Result<(f64, Diagnostics)> {
        match self {
            SeriesModel::Autoregressive(model) => {
                let prediction = model.predict_next(history)?;
                let coefficients = model
                    .coefficients()
                    .map(|c| c.to_vec())
                    .ok_or(EconcastError::ModelNotFitted)?;
                Ok((prediction, Diagnostics::Coefficients { coefficients }))
            }
            SeriesModel::MovingAverage(model) => {
                let f = model.predict(history)?;
                Ok((
                    f.prediction,
                    Diagnostics::Direction {
                        direction: f.direction,
                        confidence: f.confidence,
                        ma_change: f.ma_change,
                    },
                ))
            }
            SeriesModel::Recurrent(model) => Ok((model.predict(history)?, Diagnostics::None)),
        }
    }
}

/// Runs the selected model family over the variables of a [`Dataset`]
#[derive(Debug, Clone, Default)]
pub struct ForecastEngine {
    spec: ModelSpec,
}

impl ForecastEngine {
    pub fn new(spec: ModelSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// One-step forecast of `target`.
    ///
    /// Series families use the target's own history. The forest regresses
    /// the target at `t + 1` on the `peers` at `t` and predicts from the
    /// last peers row.
    pub fn forecast<S: AsRef<str>>(&self, dataset: &Dataset, target: &str, peers: &[S]) -> Result<Forecast> {
        self.spec.validate()?;
        let series = dataset.series(target)?;

        let (prediction, diagnostics) = match &self.spec {
            ModelSpec::RandomForest(config) => {
                let peers: Vec<&str> = peers.iter().map(|p| p.as_ref()).filter(|p| *p != target).collect();
                if peers.is_empty() {
                    return Err(EconcastError::InvalidInput(format!(
                        "no peer variables for '{}'",
                        target
                    )));
                }
                let x = dataset.feature_matrix(&peers)?;
                let n = x.nrows();
                if n < 2 {
                    return Err(EconcastError::insufficient(2, n));
                }

                let x_train = x.slice(s![..n - 1, ..]).to_owned();
                let y_train = Array1::from_vec(series[1..].to_vec());
                let mut forest = RandomForest::from_config(config);
                forest.fit(&x_train, &y_train)?;

                let prediction = forest.predict_row(&x.row(n - 1).to_vec())?;
                let importance = forest
                    .feature_importances()
                    .map(|imp| imp.to_vec())
                    .unwrap_or_else(|| vec![0.0; peers.len()]);
                let features = peers.iter().map(|p| p.to_string()).collect();
                (prediction, Diagnostics::Importance { features, importance })
            }
            spec => SeriesModel::fit(spec, &series)?.predict(&series)?,
        };

        debug!(variable = target, family = self.spec.family(), prediction, "forecast produced");
        Ok(Forecast {
            target: target.to_string(),
            prediction,
            diagnostics,
        })
    }

    /// Forecast every target; a failing target is recorded and skipped.
    pub fn forecast_all<T, S>(&self, dataset: &Dataset, targets: &[T], peers: &[S]) -> BatchReport
    where
        T: AsRef<str> + Sync,
        S: AsRef<str> + Sync,
    {
        let results: Vec<(String, Result<Forecast>)> = targets
            .par_iter()
            .map(|t| {
                let target = t.as_ref();
                (target.to_string(), self.forecast(dataset, target, peers))
            })
            .collect();

        let mut report = BatchReport::default();
        for (target, result) in results {
            match result {
                Ok(forecast) => report.forecasts.push(forecast),
                Err(error) => {
                    warn!(variable = %target, error = %error, "skipping variable");
                    report.failures.push(Failure { target, error });
                }
            }
        }
        report
    }

    /// Walk forward from `start`, predicting `series[i]` from `series[..i]`.
    ///
    /// The model is re-fit on the available history every `retrain_every`
    /// steps and reused in between.
    pub fn rolling_forecast(&self, series: &[f64], start: usize, retrain_every: usize) -> Result<RollingForecast> {
        self.spec.validate()?;
        if retrain_every == 0 {
            return Err(EconcastError::invalid_parameter(
                "retrain_every",
                retrain_every,
                "must be at least 1",
            ));
        }
        if start == 0 || start > series.len() {
            return Err(EconcastError::invalid_parameter(
                "start",
                start,
                &format!("must lie in 1..={}", series.len()),
            ));
        }

        let mut model: Option<SeriesModel> = None;
        let mut predictions = Vec::with_capacity(series.len() - start);
        let mut refits = 0;

        for i in start..series.len() {
            let history = &series[..i];
            if (i - start) % retrain_every == 0 {
                model = Some(SeriesModel::fit(&self.spec, history)?);
                refits += 1;
            }
            let fitted = model.as_ref().ok_or(EconcastError::ModelNotFitted)?;
            let (prediction, _) = fitted.predict(history)?;
            predictions.push((i, prediction));
        }

        debug!(
            family = self.spec.family(),
            steps = predictions.len(),
            refits,
            "rolling forecast finished"
        );
        Ok(RollingForecast { predictions, refits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::{AutoregressiveConfig, ForestConfig, MovingAverageConfig};

    fn economy(n: usize) -> Dataset {
        Dataset::from_columns(vec![
            ("gdp", (0..n).map(|i| 100.0 + 2.0 * i as f64).collect()),
            ("rate", (0..n).map(|i| 5.0 - 0.1 * i as f64).collect()),
            ("noise", (0..n).map(|i| ((i * 7) % 5) as f64).collect()),
        ])
        .unwrap()
    }

    #[test]
    fn test_autoregressive_forecast() {
        let engine = ForecastEngine::new(ModelSpec::Autoregressive(AutoregressiveConfig::new(1)));
        let forecast = engine.forecast::<&str>(&economy(20), "gdp", &[]).unwrap();

        assert_eq!(forecast.target, "gdp");
        assert!((forecast.prediction - 140.0).abs() < 1.0);
        match forecast.diagnostics {
            Diagnostics::Coefficients { coefficients } => assert_eq!(coefficients.len(), 2),
            other => panic!("unexpected diagnostics: {:?}", other),
        }
    }

    #[test]
    fn test_forest_forecast_uses_peers() {
        let spec = ModelSpec::RandomForest(ForestConfig::default().with_n_estimators(20).with_random_state(4));
        let engine = ForecastEngine::new(spec);
        let forecast = engine.forecast(&economy(30), "gdp", &["rate", "noise", "gdp"]).unwrap();

        assert!(forecast.prediction.is_finite());
        match forecast.diagnostics {
            Diagnostics::Importance { features, importance } => {
                assert_eq!(features, vec!["rate".to_string(), "noise".to_string()]);
                assert_eq!(importance.len(), 2);
            }
            other => panic!("unexpected diagnostics: {:?}", other),
        }
    }

    #[test]
    fn test_forest_requires_peers() {
        let engine = ForecastEngine::new(ModelSpec::RandomForest(ForestConfig::default()));
        assert!(matches!(
            engine.forecast(&economy(30), "gdp", &["gdp"]),
            Err(EconcastError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unknown_target() {
        let engine = ForecastEngine::default();
        assert!(matches!(
            engine.forecast::<&str>(&economy(10), "m2", &[]),
            Err(EconcastError::FeatureNotFound(_))
        ));
    }

    #[test]
    fn test_rolling_cadence() {
        let engine = ForecastEngine::new(ModelSpec::Autoregressive(AutoregressiveConfig::new(1)));
        let series: Vec<f64> = (0..20).map(|i| 10.0 + i as f64).collect();

        let rolling = engine.rolling_forecast(&series, 10, 4).unwrap();
        assert_eq!(rolling.predictions.len(), 10);
        assert_eq!(rolling.predictions[0].0, 10);
        // Fits at 10, 14, 18
        assert_eq!(rolling.refits, 3);
        for (i, p) in &rolling.predictions {
            assert!((p - series[*i]).abs() < 1.0, "index {}: {}", i, p);
        }
    }

    #[test]
    fn test_rolling_rejects_bad_arguments() {
        let engine = ForecastEngine::new(ModelSpec::ConstrainedMovingAverage(MovingAverageConfig::new(2)));
        let series = [1.0, 2.0, 3.0, 4.0];
        assert!(engine.rolling_forecast(&series, 2, 0).is_err());
        assert!(engine.rolling_forecast(&series, 0, 1).is_err());
        assert!(engine.rolling_forecast(&series, 5, 1).is_err());
    }
}
