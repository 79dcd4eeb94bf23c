//! Weather observations for Skycast
//!
//! Defines the normalized observation shape shared by the store, the
//! forecaster and the alert scheduler, plus the provider collaborator that
//! fetches fresh observations from Open-Meteo.

pub mod geocode;
pub mod provider;
pub mod types;

pub use geocode::{geocode, GeoMatch};
pub use provider::{OpenMeteoConfig, OpenMeteoProvider, WeatherSource};
pub use types::*;
