//! Error types for the econcast forecasting toolkit

use thiserror::Error;

/// Result type alias for econcast operations
pub type Result<T> = std::result::Result<T, EconcastError>;

/// Main error type for the toolkit.
///
/// Every model reports "cannot produce a usable result" through this enum
/// instead of handing back a NaN the caller might trust.
#[derive(Error, Debug)]
pub enum EconcastError {
    #[error("Insufficient data: need at least {required} valid points, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Numeric failure: {0}")]
    NumericFailure(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl EconcastError {
    pub(crate) fn insufficient(required: usize, actual: usize) -> Self {
        EconcastError::InsufficientData { required, actual }
    }

    pub(crate) fn invalid_parameter(name: &str, value: impl ToString, reason: &str) -> Self {
        EconcastError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for EconcastError {
    fn from(err: serde_json::Error) -> Self {
        EconcastError::ConfigError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for EconcastError {
    fn from(err: ndarray::ShapeError) -> Self {
        EconcastError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}
