//! Location identity for the time series.

use crate::error::{StoreError, StoreResult};

/// A place whose observations are tracked, keyed by its normalized name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub country: Option<String>,
}

/// Normalize a location name into its time-series key.
///
/// Trims surrounding whitespace and case-folds, so "  London" and "LONDON"
/// resolve to the same key. Applying it twice gives the same result.
///
/// # Errors
/// Returns `StoreError::Validation` when the name is blank.
pub fn normalize_location(name: &str) -> StoreResult<String> {
    let normalized = name.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(StoreError::validation("Location name cannot be empty"));
    }
    Ok(normalized)
}
