//! Integration test: forecasting many indicators through the engine

use econcast::forecast::{Dataset, Diagnostics, ForecastEngine};
use econcast::training::{
    AutoregressiveConfig, ForestConfig, ModelSpec, MovingAverageConfig, RecurrentConfig,
};
use econcast::EconcastError;

fn indicators() -> Dataset {
    let n = 36;
    Dataset::from_columns(vec![
        ("gdp", (0..n).map(|i| 200.0 + 3.0 * i as f64 + (i % 4) as f64).collect()),
        ("unemployment", (0..n).map(|i| 8.0 - 0.05 * i as f64).collect()),
        ("cpi", (0..n).map(|i| 100.0 * 1.002f64.powi(i as i32)).collect()),
        // Only three usable points
        (
            "housing",
            (0..n).map(|i| if i < 3 { 1.0 + i as f64 } else { f64::NAN }).collect(),
        ),
    ])
    .unwrap()
}

#[test]
fn test_batch_continues_past_failures() {
    let engine = ForecastEngine::new(ModelSpec::Autoregressive(AutoregressiveConfig::new(3)));
    let targets = ["gdp", "housing", "missing", "cpi"];

    let report = engine.forecast_all::<_, &str>(&indicators(), &targets, &[]);

    let ok: Vec<&str> = report.forecasts.iter().map(|f| f.target.as_str()).collect();
    assert_eq!(ok, vec!["gdp", "cpi"]);
    assert_eq!(report.failures.len(), 2);
    assert!(matches!(
        report.failures[0].error,
        EconcastError::InsufficientData { required: 4, actual: 3 }
    ));
    assert_eq!(report.failures[1].target, "missing");
    assert!(matches!(report.failures[1].error, EconcastError::FeatureNotFound(_)));
}

#[test]
fn test_forest_batch_over_peers() {
    let spec = ModelSpec::RandomForest(
        ForestConfig::default()
            .with_n_estimators(25)
            .with_max_depth(6)
            .with_random_state(12),
    );
    let engine = ForecastEngine::new(spec);
    let mut dataset = indicators();
    assert_eq!(dataset.drop_sparse_columns(0.3), vec!["housing".to_string()]);

    let columns: Vec<String> = dataset.columns().to_vec();
    let report = engine.forecast_all(&dataset, &columns, &columns);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.forecasts.len(), 3);

    for forecast in &report.forecasts {
        assert!(forecast.prediction.is_finite());
        match &forecast.diagnostics {
            Diagnostics::Importance { features, importance } => {
                assert_eq!(features.len(), 2);
                assert!(!features.contains(&forecast.target));
                let total: f64 = importance.iter().sum();
                assert!(total == 0.0 || (total - 1.0).abs() < 1e-9);
            }
            other => panic!("unexpected diagnostics: {:?}", other),
        }
    }
}

#[test]
fn test_moving_average_spec_from_json() {
    let spec = ModelSpec::from_json(
        r#"{"model": "constrained_moving_average", "period": 3, "n_estimators": 20, "random_state": 5}"#,
    )
    .unwrap();
    assert_eq!(
        spec,
        ModelSpec::ConstrainedMovingAverage(MovingAverageConfig {
            n_estimators: 20,
            ..MovingAverageConfig::new(3).with_random_state(5)
        })
    );

    let forecast = ForecastEngine::new(spec)
        .forecast::<&str>(&indicators(), "unemployment", &[])
        .unwrap();
    match forecast.diagnostics {
        Diagnostics::Direction { ma_change, confidence, .. } => {
            assert!((ma_change - 0.05).abs() < 1e-9);
            assert!(confidence >= 0.5);
            assert!(((forecast.prediction - 6.25).abs() - ma_change).abs() < 1e-9);
        }
        other => panic!("unexpected diagnostics: {:?}", other),
    }
}

#[test]
fn test_recurrent_rolling_forecast() {
    let spec = ModelSpec::Recurrent(RecurrentConfig::new(3, 2).with_epochs(5).with_random_state(1));
    let engine = ForecastEngine::new(spec);
    let series = indicators().series("gdp").unwrap();

    let rolling = engine.rolling_forecast(&series, 20, 4).unwrap();
    assert_eq!(rolling.predictions.len(), 16);
    assert_eq!(rolling.refits, 4);
    assert!(rolling.predictions.iter().all(|(_, p)| p.is_finite()));
    let indices: Vec<usize> = rolling.predictions.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, (20..36).collect::<Vec<_>>());
}

#[test]
fn test_rolling_forecast_rejects_forest() {
    let engine = ForecastEngine::new(ModelSpec::RandomForest(ForestConfig::default()));
    let series: Vec<f64> = (0..20).map(|i| i as f64).collect();
    assert!(matches!(
        engine.rolling_forecast(&series, 12, 1),
        Err(EconcastError::InvalidInput(_))
    ));
}
