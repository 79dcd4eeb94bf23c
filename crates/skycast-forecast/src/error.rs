//! Forecaster error types.

use skycast_store::StoreError;
use thiserror::Error;

/// Errors raised by training and prediction.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Not enough observations to train or predict; gather more data.
    #[error("Insufficient data: need at least {required} observations, have {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// The temperature series has no variance, so it cannot be normalized.
    #[error("Degenerate series: temperature is constant at {mean:.2}°C")]
    DegenerateSeries { mean: f64 },

    /// Caller supplied unusable values (non-finite temperatures).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A stored artifact could not be encoded, decoded or trusted.
    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Artifact storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ForecastError {
    /// Create an artifact error.
    pub fn artifact(message: impl Into<String>) -> Self {
        Self::Artifact(message.into())
    }
}

/// Result type for forecaster operations.
pub type ForecastResult<T> = Result<T, ForecastError>;
