//! Z-score normalization of a temperature series.

use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, ForecastResult};

/// Relative tolerance below which a standard deviation counts as zero.
const DEGENERATE_STD: f64 = 1e-9;

/// Population mean and standard deviation of a training series.
///
/// Stored with every model artifact; prediction must reuse these exact
/// values rather than recompute them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub mean: f64,
    pub std: f64,
}

impl NormalizationStats {
    /// Compute statistics over `series`.
    ///
    /// # Errors
    /// `InsufficientData` for an empty series, `DegenerateSeries` when the
    /// standard deviation is effectively zero, `InvalidInput` when a value
    /// is not finite.
    pub fn fit(series: &[f64]) -> ForecastResult<Self> {
        if series.is_empty() {
            return Err(ForecastError::InsufficientData {
                required: 1,
                actual: 0,
            });
        }
        if series.iter().any(|x| !x.is_finite()) {
            return Err(ForecastError::InvalidInput(
                "temperature series contains non-finite values".to_string(),
            ));
        }

        let n = series.len() as f64;
        let mean = series.iter().sum::<f64>() / n;
        let std = (series.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();

        let stats = Self { mean, std };
        stats.check()?;
        Ok(stats)
    }

    /// Reject statistics that cannot be inverted.
    pub fn check(&self) -> ForecastResult<()> {
        if !self.mean.is_finite() || !self.std.is_finite() {
            return Err(ForecastError::InvalidInput(
                "normalization statistics are not finite".to_string(),
            ));
        }
        if self.std <= DEGENERATE_STD * (1.0 + self.mean.abs()) {
            return Err(ForecastError::DegenerateSeries { mean: self.mean });
        }
        Ok(())
    }

    pub fn normalize(&self, value: f64) -> f64 {
        (value - self.mean) / self.std
    }

    pub fn denormalize(&self, value: f64) -> f64 {
        value * self.std + self.mean
    }
}
