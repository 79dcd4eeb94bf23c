use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use skycast_alerts::Condition;
use skycast_forecast::forecaster::{
    DEFAULT_EPOCHS, DEFAULT_HIDDEN_SIZE, DEFAULT_LEARNING_RATE, DEFAULT_SEED, MAX_LEARNING_RATE,
};
use skycast_forecast::ForecasterConfig;
use skycast_weather::provider::{DEFAULT_FORECAST_URL, DEFAULT_GEOCODING_URL, DEFAULT_TIMEOUT_SECS};
use skycast_weather::OpenMeteoConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where observations and trained models live
    #[serde(default)]
    pub storage: StorageConfig,

    /// Weather provider endpoints
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Training hyperparameters
    #[serde(default)]
    pub forecast: ForecastConfig,

    /// Alert jobs registered at startup
    #[serde(default)]
    pub alerts: AlertsConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skycast")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file for observations
    pub database_path: PathBuf,

    /// Directory for model artifacts
    pub models_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            database_path: data_dir.join("weather.db"),
            models_dir: data_dir.join("models"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_geocoding_url")]
    pub geocoding_url: String,

    #[serde(default = "default_forecast_url")]
    pub forecast_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_geocoding_url() -> String {
    DEFAULT_GEOCODING_URL.to_string()
}

fn default_forecast_url() -> String {
    DEFAULT_FORECAST_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            geocoding_url: default_geocoding_url(),
            forecast_url: default_forecast_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn to_open_meteo(&self) -> OpenMeteoConfig {
        OpenMeteoConfig {
            geocoding_url: self.geocoding_url.clone(),
            forecast_url: self.forecast_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    /// Budget for one alert fetch, which geocodes and then requests the
    /// forecast, each under the per-request timeout.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.saturating_mul(2))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
}

fn default_epochs() -> usize {
    DEFAULT_EPOCHS
}

fn default_learning_rate() -> f64 {
    DEFAULT_LEARNING_RATE
}

fn default_hidden_size() -> usize {
    DEFAULT_HIDDEN_SIZE
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            learning_rate: default_learning_rate(),
            hidden_size: default_hidden_size(),
        }
    }
}

impl ForecastConfig {
    pub fn to_forecaster(&self) -> ForecasterConfig {
        ForecasterConfig {
            epochs: self.epochs,
            learning_rate: self.learning_rate,
            hidden_size: self.hidden_size,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Interval for jobs that don't set their own
    #[serde(default = "default_interval_minutes")]
    pub default_interval_minutes: u32,

    #[serde(default)]
    pub jobs: Vec<AlertJobConfig>,
}

fn default_interval_minutes() -> u32 {
    60
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            default_interval_minutes: default_interval_minutes(),
            jobs: Vec::new(),
        }
    }
}

/// An alert job registered when the app starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertJobConfig {
    pub location: String,

    /// e.g. `temp > 30`
    pub condition: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u32>,
}

impl AlertJobConfig {
    pub fn interval(&self, default_minutes: u32) -> u32 {
        self.interval_minutes.unwrap_or(default_minutes)
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, writing defaults there if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        validate_url(&self.provider.geocoding_url, "provider.geocoding_url", &mut result);
        validate_url(&self.provider.forecast_url, "provider.forecast_url", &mut result);

        if self.provider.timeout_secs == 0 {
            result.add_error("provider.timeout_secs", "Timeout must be greater than 0");
        } else if self.provider.timeout_secs > 60 {
            result.add_warning(
                "provider.timeout_secs",
                "Timeout is unusually long (>60 seconds)",
            );
        }

        if self.forecast.epochs == 0 {
            result.add_error("forecast.epochs", "Epochs must be greater than 0");
        }
        if !self.forecast.learning_rate.is_finite() || self.forecast.learning_rate <= 0.0 {
            result.add_error(
                "forecast.learning_rate",
                "Learning rate must be a positive number",
            );
        } else if self.forecast.learning_rate > MAX_LEARNING_RATE {
            result.add_error(
                "forecast.learning_rate",
                format!("Learning rate must not exceed {MAX_LEARNING_RATE}"),
            );
        } else if self.forecast.learning_rate > 0.2 {
            result.add_warning(
                "forecast.learning_rate",
                "Learning rate above 0.2 may train erratically",
            );
        }
        if self.forecast.hidden_size == 0 {
            result.add_error("forecast.hidden_size", "Hidden size must be greater than 0");
        }

        if self.alerts.default_interval_minutes == 0 {
            result.add_error(
                "alerts.default_interval_minutes",
                "Interval must be at least one minute",
            );
        }

        for (i, job) in self.alerts.jobs.iter().enumerate() {
            let field = format!("alerts.jobs[{i}]");
            if job.location.trim().is_empty() {
                result.add_error(format!("{field}.location"), "Location must not be blank");
            }
            if let Err(e) = job.condition.parse::<Condition>() {
                result.add_error(format!("{field}.condition"), e.to_string());
            }
            if job.interval_minutes == Some(0) {
                result.add_error(
                    format!("{field}.interval_minutes"),
                    "Interval must be at least one minute",
                );
            }
        }

        result
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("skycast");

        Ok(config_dir.join("config.toml"))
    }
}

/// Validate a URL field
fn validate_url(url_str: &str, field_name: &str, result: &mut ValidationResult) {
    match Url::parse(url_str) {
        Ok(url) => {
            if url.scheme() != "http" && url.scheme() != "https" {
                result.add_error(
                    field_name,
                    format!("URL must use http or https scheme, got: {}", url.scheme()),
                );
            }

            if url.host().is_none() {
                result.add_error(field_name, "URL must have a host");
            }

            if url.port() == Some(0) {
                result.add_error(field_name, "Port cannot be 0");
            }
        }
        Err(e) => {
            result.add_error(field_name, format!("Invalid URL: {}", e));
        }
    }
}
