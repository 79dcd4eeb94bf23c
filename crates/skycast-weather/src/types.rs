use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source tag recorded on observations fetched from Open-Meteo
pub const OPEN_METEO_SOURCE: &str = "open-meteo";

/// Weather condition categories mapped from WMO codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    Clear,
    MainlyClear,
    PartlyCloudy,
    Overcast,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Thunderstorm,
    #[default]
    Variable,
}

impl WeatherCondition {
    /// Convert WMO weather code to WeatherCondition
    /// See: https://open-meteo.com/en/docs#weathervariables
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            0 => Self::Clear,
            1 => Self::MainlyClear,
            2 => Self::PartlyCloudy,
            3 => Self::Overcast,
            45 | 48 => Self::Fog,
            51 | 53 | 55 => Self::Drizzle,
            56 | 57 => Self::Sleet, // Freezing drizzle
            61 | 63 | 80 => Self::Rain,
            65 | 81 | 82 => Self::HeavyRain,
            66 | 67 => Self::Sleet, // Freezing rain
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snow,
            95 | 96 | 99 => Self::Thunderstorm,
            _ => Self::Variable,
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Clear sky",
            Self::MainlyClear => "Mainly clear",
            Self::PartlyCloudy => "Partly cloudy",
            Self::Overcast => "Overcast",
            Self::Fog => "Fog",
            Self::Drizzle => "Drizzle",
            Self::Rain => "Rain",
            Self::HeavyRain => "Heavy rain",
            Self::Snow => "Snow",
            Self::Sleet => "Sleet",
            Self::Thunderstorm => "Thunderstorm",
            Self::Variable => "Variable",
        }
    }
}

/// Convert Celsius to Fahrenheit, rounded to one decimal place.
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    ((celsius * 9.0 / 5.0 + 32.0) * 10.0).round() / 10.0
}

/// One point-in-time weather sample for a location.
///
/// Observations are immutable once stored; the store only ever appends them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub temp_c: f64,
    pub temp_f: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    pub wind_speed_kmph: f64,
    pub condition_text: String,
    pub source: String,
}

impl Observation {
    /// Build an observation stamped with the current time.
    ///
    /// Fahrenheit is derived from the Celsius reading.
    pub fn new(temp_c: f64, humidity: f64, wind_speed_kmph: f64, condition_text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            temp_c,
            temp_f: celsius_to_fahrenheit(temp_c),
            humidity,
            wind_speed_kmph,
            condition_text: condition_text.into(),
            source: OPEN_METEO_SOURCE.to_string(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Check the numeric fields before the observation is persisted.
    ///
    /// # Errors
    /// Returns `ObservationError` for non-finite values, humidity outside
    /// 0..=100 or a negative wind speed.
    pub fn validate(&self) -> Result<(), ObservationError> {
        let fields = [
            ("temp_c", self.temp_c),
            ("temp_f", self.temp_f),
            ("humidity", self.humidity),
            ("wind_speed_kmph", self.wind_speed_kmph),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(ObservationError::NotFinite { field });
            }
        }
        if !(0.0..=100.0).contains(&self.humidity) {
            return Err(ObservationError::OutOfRange {
                field: "humidity",
                value: self.humidity,
            });
        }
        if self.wind_speed_kmph < 0.0 {
            return Err(ObservationError::OutOfRange {
                field: "wind_speed_kmph",
                value: self.wind_speed_kmph,
            });
        }
        Ok(())
    }
}

/// An observation as delivered by an untyped source, numbers still as text.
///
/// `parse` converts every field or rejects the whole record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawObservation {
    pub timestamp: Option<DateTime<Utc>>,
    pub temp_c: String,
    /// Derived from `temp_c` when absent
    pub temp_f: Option<String>,
    pub humidity: String,
    pub wind_speed_kmph: String,
    pub condition_text: String,
    pub source: Option<String>,
}

impl RawObservation {
    /// Parse into a typed, validated observation.
    ///
    /// # Errors
    /// Returns `ObservationError::NotNumeric` for the first field that fails
    /// to parse, or any error from [`Observation::validate`].
    pub fn parse(&self) -> Result<Observation, ObservationError> {
        let temp_c = parse_number("temp_c", &self.temp_c)?;
        let temp_f = match &self.temp_f {
            Some(raw) => parse_number("temp_f", raw)?,
            None => celsius_to_fahrenheit(temp_c),
        };
        let observation = Observation {
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            temp_c,
            temp_f,
            humidity: parse_number("humidity", &self.humidity)?,
            wind_speed_kmph: parse_number("wind_speed_kmph", &self.wind_speed_kmph)?,
            condition_text: self.condition_text.trim().to_string(),
            source: self
                .source
                .clone()
                .unwrap_or_else(|| OPEN_METEO_SOURCE.to_string()),
        };
        observation.validate()?;
        Ok(observation)
    }
}

fn parse_number(field: &'static str, raw: &str) -> Result<f64, ObservationError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ObservationError::NotNumeric {
            field,
            value: raw.to_string(),
        })
}

/// A fresh observation plus whatever the provider learned about the place.
#[derive(Debug, Clone)]
pub struct FetchedObservation {
    pub observation: Observation,
    pub country: Option<String>,
}

/// Observation field errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ObservationError {
    #[error("Field {field} is not a number: {value:?}")]
    NotNumeric { field: &'static str, value: String },
    #[error("Field {field} is not finite")]
    NotFinite { field: &'static str },
    #[error("Field {field} is out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Weather provider errors
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Location not found: {0}")]
    LocationNotFound(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(reqwest::Error),
    #[error("Provider returned status {status}")]
    Status { status: u16 },
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout
        } else if error.is_decode() {
            FetchError::Parse(error.to_string())
        } else if let Some(status) = error.status() {
            FetchError::Status {
                status: status.as_u16(),
            }
        } else {
            FetchError::Network(error)
        }
    }
}
