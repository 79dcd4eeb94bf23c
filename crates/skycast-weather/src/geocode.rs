//! Forward geocoding: convert a place name to coordinates.
//! Uses the Open-Meteo geocoding API - free, no API key required.

use reqwest::Client;
use serde::Deserialize;

use crate::types::FetchError;

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeoMatch>,
}

/// Best match for a place name
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeoMatch {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub country: Option<String>,
}

/// Resolve a place name to its first geocoding match.
///
/// # Errors
/// Returns `FetchError::LocationNotFound` when the API has no match, or a
/// network/status/parse error from the request.
pub async fn geocode(client: &Client, base_url: &str, name: &str) -> Result<GeoMatch, FetchError> {
    let response = client
        .get(base_url)
        .query(&[("name", name), ("count", "1"), ("language", "en"), ("format", "json")])
        .send()
        .await?;

    if !response.status().is_success() {
        tracing::debug!("Geocoding returned status {}", response.status());
        return Err(FetchError::Status {
            status: response.status().as_u16(),
        });
    }

    let body: GeocodingResponse = response.json().await?;
    let found = body
        .results
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::LocationNotFound(name.to_string()))?;

    tracing::debug!(
        "Geocoded {} to {}, {} ({})",
        name,
        found.latitude,
        found.longitude,
        found.country.as_deref().unwrap_or("unknown country")
    );
    Ok(found)
}
