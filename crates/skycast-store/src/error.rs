//! Observation store error types.

use skycast_weather::ObservationError;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The observation or location name was rejected; nothing was written.
    #[error("Validation error: {0}")]
    Validation(String),

    /// SQLite failure (open, schema, query).
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StoreError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<ObservationError> for StoreError {
    fn from(error: ObservationError) -> Self {
        Self::Validation(error.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
