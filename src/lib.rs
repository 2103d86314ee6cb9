//! econcast - One-step-ahead forecasting of economic indicators
//!
//! This crate provides four interchangeable model families behind a
//! fit-then-predict-one-step contract:
//! - Random forests in a classification and a recency-weighted regression variant
//! - Ridge-regularized linear autoregression
//! - A constrained moving average (forest direction, trend magnitude)
//! - An experimental chain of LSTM cells
//!
//! # Modules
//!
//! ## Models
//! - [`training`] - Decision trees, forests, autoregression, moving average, LSTM chain
//! - [`forecast`] - Named datasets, batch and walk-forward forecasting
//!
//! ## Numerics
//! - [`linalg`] - Shape-checked matrix helpers and a pivoting linear solver
//! - [`timeseries`] - Differences, direction features, lag windows, normalization
//! - [`utils`] - Finite-value filters and cancellation
//!
//! # Example
//!
//! ```
//! use econcast::prelude::*;
//!
//! let series = [100.0, 102.0, 101.0, 105.0, 108.0, 107.0, 110.0];
//! let mut model = AutoregressiveModel::new(2);
//! model.fit(&series)?;
//! let next = model.predict(&[107.0, 110.0])?;
//! assert!(next.is_finite());
//! # Ok::<(), econcast::EconcastError>(())
//! ```

// Core error handling
pub mod error;

// Numerics
pub mod linalg;
pub mod timeseries;
pub mod utils;

// Models
pub mod training;
pub mod forecast;

pub use error::{EconcastError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{EconcastError, Result};

    // Models
    pub use crate::training::{
        AutoregressiveConfig, AutoregressiveModel, ConstrainedMovingAverageModel, DecisionTree,
        Direction, ForestConfig, JitterConfig, LeafAggregation, ModelSpec, MovingAverageConfig,
        MovingAverageForecast, RandomForest, RecurrentCellChain, RecurrentConfig,
    };

    // Orchestration
    pub use crate::forecast::{BatchReport, Dataset, Diagnostics, Forecast, ForecastEngine};

    // Utilities
    pub use crate::utils::CancellationToken;
}
