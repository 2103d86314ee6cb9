//! Time series module
//!
//! Feature engineering shared by the series models:
//! - First differences, trailing means and volatility
//! - Up/down direction features for the moving-average classifier
//! - Overlapping lag windows for the recurrent chain
//! - Z-score normalization persisted across fit and predict

mod features;
mod transforms;

pub use features::{differences, lag_windows, population_std, trailing_mean, DirectionFeatures};
pub use transforms::Normalization;
