//! Alert scheduler error types.

use thiserror::Error;

/// Errors raised synchronously by the scheduler API.
///
/// Failures inside a firing (fetch or store) are logged and never surface
/// here.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Invalid condition {condition:?}: {reason}")]
    InvalidCondition { condition: String, reason: String },

    #[error("Interval must be at least one minute")]
    InvalidInterval,

    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Scheduler needs a tokio runtime to start")]
    NoRuntime,
}

impl AlertError {
    pub(crate) fn invalid_condition(condition: &str, reason: impl Into<String>) -> Self {
        Self::InvalidCondition {
            condition: condition.to_string(),
            reason: reason.into(),
        }
    }
}
