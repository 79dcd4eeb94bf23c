//! Centralized error types for Skycast.
//!
//! Each library crate owns its error enum; `AppError` wraps them at the
//! application boundary and maps every variant to a short message fit for
//! an end user.

use skycast_alerts::AlertError;
use skycast_forecast::ForecastError;
use skycast_store::StoreError;
use skycast_weather::FetchError;
use thiserror::Error;

/// Top-level application error type.
///
/// Use `user_message()` to get a display-appropriate message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Weather provider error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Forecast error: {0}")]
    Forecast(#[from] ForecastError),

    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Returns a user-friendly message suitable for display.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Fetch(e) => fetch_message(e),
            AppError::Store(e) => store_message(e),
            AppError::Forecast(e) => forecast_message(e),
            AppError::Alert(e) => alert_message(e),
            AppError::Config(e) => e.user_message(),
            AppError::Io(_) => "A file operation failed. Please try again.",
            AppError::Task(_) => "Something went wrong. Please try again.",
            AppError::Other(_) => "An unexpected error occurred. Please try again.",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
        }
    }
}

fn fetch_message(error: &FetchError) -> &'static str {
    match error {
        FetchError::LocationNotFound(_) => "Location not found. Check and try again.",
        FetchError::Timeout => "The weather service timed out. Please try again.",
        FetchError::Network(_) => "Unable to reach the weather service. Check your connection.",
        FetchError::Status { status } if *status >= 500 => {
            "Weather service unavailable. Please try again later."
        }
        FetchError::Status { .. } => "The weather request failed. Please try again.",
        FetchError::Parse(_) => "Received an unexpected response from the weather service.",
    }
}

fn store_message(error: &StoreError) -> &'static str {
    match error {
        StoreError::Validation(_) => "The observation was rejected. Check the values.",
        StoreError::Database(e) if is_corruption(e) => {
            "Local data may be corrupted. Consider resetting app data."
        }
        StoreError::Database(_) => "A data operation failed. Please try again.",
    }
}

fn forecast_message(error: &ForecastError) -> &'static str {
    match error {
        ForecastError::InsufficientData { .. } => {
            "Not enough observations yet. Collect more data and try again."
        }
        ForecastError::DegenerateSeries { .. } => {
            "Temperatures have not changed, so there is nothing to learn yet."
        }
        ForecastError::InvalidInput(_) => "The temperatures given are not valid numbers.",
        ForecastError::Artifact(_) => "The saved model is unreadable. Train it again.",
        ForecastError::Io(_) => "Could not access saved models. Please try again.",
        ForecastError::Store(e) => store_message(e),
    }
}

fn alert_message(error: &AlertError) -> &'static str {
    match error {
        AlertError::InvalidCondition { .. } => {
            "Alert condition not understood. Use e.g. \"temp > 30\"."
        }
        AlertError::InvalidInterval => "Alert interval must be at least one minute.",
        AlertError::InvalidLocation(_) => "Location must not be blank.",
        AlertError::NotRunning | AlertError::NoRuntime => {
            "Alerts are not running. Restart the app and try again."
        }
    }
}

fn is_corruption(error: &rusqlite::Error) -> bool {
    match error {
        rusqlite::Error::SqliteFailure(e, msg) => {
            e.code == rusqlite::ErrorCode::DatabaseCorrupt
                || e.code == rusqlite::ErrorCode::NotADatabase
                || msg.as_deref().is_some_and(|m| m.contains("corrupt"))
        }
        _ => false,
    }
}
