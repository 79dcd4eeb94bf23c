use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::geocode::geocode;
use crate::types::{
    celsius_to_fahrenheit, FetchError, FetchedObservation, Observation, WeatherCondition,
    OPEN_METEO_SOURCE,
};

pub const DEFAULT_GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
pub const DEFAULT_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// Anything that can produce a fresh observation for a named location.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Fetch the current observation for `location`.
    async fn fetch(&self, location: &str) -> Result<FetchedObservation, FetchError>;
}

/// Open-Meteo endpoints and request timeout
#[derive(Debug, Clone)]
pub struct OpenMeteoConfig {
    pub geocoding_url: String,
    pub forecast_url: String,
    pub timeout: Duration,
}

impl Default for OpenMeteoConfig {
    fn default() -> Self {
        Self {
            geocoding_url: DEFAULT_GEOCODING_URL.to_string(),
            forecast_url: DEFAULT_FORECAST_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: CurrentBlock,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    temperature_2m: f64,
    relative_humidity_2m: f64,
    wind_speed_10m: f64,
    weather_code: i32,
}

/// Open-Meteo client: geocodes the name, then reads current conditions.
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    client: Arc<Client>,
    config: OpenMeteoConfig,
}

impl OpenMeteoProvider {
    pub fn new(config: OpenMeteoConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(FetchError::Network)?;

        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    async fn fetch_current(&self, latitude: f64, longitude: f64) -> Result<CurrentBlock, FetchError> {
        let response = self
            .client
            .get(&self.config.forecast_url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                (
                    "current",
                    "temperature_2m,relative_humidity_2m,wind_speed_10m,weather_code".to_string(),
                ),
                ("wind_speed_unit", "kmh".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
            });
        }

        let body: ForecastResponse = response.json().await?;
        Ok(body.current)
    }
}

#[async_trait]
impl WeatherSource for OpenMeteoProvider {
    async fn fetch(&self, location: &str) -> Result<FetchedObservation, FetchError> {
        let place = geocode(&self.client, &self.config.geocoding_url, location).await?;
        let current = self.fetch_current(place.latitude, place.longitude).await?;

        let condition = WeatherCondition::from_wmo_code(current.weather_code);
        let observation = Observation {
            timestamp: Utc::now(),
            temp_c: current.temperature_2m,
            temp_f: celsius_to_fahrenheit(current.temperature_2m),
            humidity: current.relative_humidity_2m,
            wind_speed_kmph: current.wind_speed_10m,
            condition_text: condition.description().to_string(),
            source: OPEN_METEO_SOURCE.to_string(),
        };

        tracing::info!(
            "Fetched weather for {}: {:.1}°C, {}",
            location,
            observation.temp_c,
            observation.condition_text
        );

        Ok(FetchedObservation {
            observation,
            country: place.country,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_uses_short_timeout() {
        let config = OpenMeteoConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert!(config.forecast_url.starts_with("https://"));
    }

    #[test]
    fn test_provider_builds_from_default_config() {
        assert!(OpenMeteoProvider::new(OpenMeteoConfig::default()).is_ok());
    }
}
