//! Forecast orchestration
//!
//! Binds named dataset columns to the model families and runs one-step
//! forecasts for a single variable, a batch of variables, or a walk-forward
//! evaluation over a series.

mod dataset;
mod engine;

pub use dataset::Dataset;
pub use engine::{BatchReport, Diagnostics, Failure, Forecast, ForecastEngine, RollingForecast};
