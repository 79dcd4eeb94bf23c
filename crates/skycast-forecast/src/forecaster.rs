//! Train and serve per-location temperature models.
//!
//! Per location the forecaster is either untrained (no artifact) or trained.
//! Training runs synchronously on the calling thread and is CPU-bound, so
//! async callers should move it to a blocking task.

use std::sync::Arc;

use chrono::Utc;
use skycast_store::{normalize_location, ObservationStore};

use crate::artifact::{ArtifactStore, ModelArtifact};
use crate::error::{ForecastError, ForecastResult};
use crate::model::SequenceModel;
use crate::normalize::NormalizationStats;
use crate::window::{build_windows, WINDOW};

/// Fewer observations than this make fitting meaningless
pub const MIN_TRAINING_SAMPLES: usize = 10;
/// How far back training looks
pub const TRAINING_HISTORY_DAYS: u32 = 365;
/// How far back `predict_next` looks for its input window
pub const RECENT_HISTORY_DAYS: u32 = 5;

pub const DEFAULT_EPOCHS: usize = 100;
pub const DEFAULT_LEARNING_RATE: f64 = 0.05;
/// Largest learning rate that converges on normalized series
pub const MAX_LEARNING_RATE: f64 = 0.5;
pub const DEFAULT_HIDDEN_SIZE: usize = 8;
pub const DEFAULT_SEED: u64 = 42;

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq)]
pub struct ForecasterConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub hidden_size: usize,
    /// Seed for weight initialisation
    pub seed: u64,
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            learning_rate: DEFAULT_LEARNING_RATE,
            hidden_size: DEFAULT_HIDDEN_SIZE,
            seed: DEFAULT_SEED,
        }
    }
}

/// Outcome of a successful `train` call.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// Storage key of the written artifact (normalized location name)
    pub key: String,
    pub samples: usize,
    pub windows: usize,
    pub epochs: usize,
    /// Loss of the final epoch, measured before its update
    pub final_loss: f64,
    /// Model estimate in °C for the last training window
    pub fitted_last: f64,
}

impl TrainingReport {
    /// Human-readable training summary.
    pub fn summary(&self) -> String {
        format!(
            "Training complete for {} ({} samples, {} epochs). Loss: {:.4}",
            self.key, self.samples, self.epochs, self.final_loss
        )
    }
}

/// Trains models from the observation store and predicts from artifacts.
#[derive(Clone)]
pub struct Forecaster {
    store: ObservationStore,
    artifacts: Arc<dyn ArtifactStore>,
    config: ForecasterConfig,
}

impl Forecaster {
    pub fn new(store: ObservationStore, artifacts: Arc<dyn ArtifactStore>, config: ForecasterConfig) -> Self {
        Self {
            store,
            artifacts,
            config,
        }
    }

    pub fn config(&self) -> &ForecasterConfig {
        &self.config
    }

    /// Train with the configured epoch count.
    pub fn train(&self, location: &str) -> ForecastResult<TrainingReport> {
        self.train_with_epochs(location, self.config.epochs)
    }

    /// Fit a fresh model on up to a year of history and persist it,
    /// replacing any previous artifact for the location.
    ///
    /// # Errors
    /// `InsufficientData` with fewer than ten observations,
    /// `DegenerateSeries` when every temperature is the same, plus store
    /// and artifact storage failures. Poor convergence is never an error.
    pub fn train_with_epochs(&self, location: &str, epochs: usize) -> ForecastResult<TrainingReport> {
        let key = normalize_location(location)?;

        let mut temps: Vec<f64> = self
            .store
            .history(&key, TRAINING_HISTORY_DAYS)?
            .into_iter()
            .map(|stored| stored.observation.temp_c)
            .collect();
        temps.reverse(); // Oldest first

        if temps.len() < MIN_TRAINING_SAMPLES {
            return Err(ForecastError::InsufficientData {
                required: MIN_TRAINING_SAMPLES,
                actual: temps.len(),
            });
        }

        let stats = NormalizationStats::fit(&temps)?;
        let normalized: Vec<f64> = temps.iter().map(|&t| stats.normalize(t)).collect();
        let windows = build_windows(&normalized);
        let Some(last_window) = windows.last().copied() else {
            return Err(ForecastError::InsufficientData {
                required: WINDOW + 1,
                actual: temps.len(),
            });
        };

        tracing::info!(
            "Training model for {} on {} samples ({} windows, {} epochs)",
            key,
            temps.len(),
            windows.len(),
            epochs
        );

        let mut model = SequenceModel::new(self.config.hidden_size, self.config.seed);
        let mut final_loss = model.loss(&windows);
        for _ in 0..epochs {
            final_loss = model.train_step(&windows, self.config.learning_rate);
        }
        let fitted_last = stats.denormalize(model.forward(&last_window.inputs));

        let artifact = ModelArtifact {
            location: key.clone(),
            model,
            mean: stats.mean,
            std: stats.std,
            trained_at: Utc::now(),
            samples: temps.len(),
            final_loss,
        };
        self.artifacts.put(&key, &artifact.to_bytes()?)?;

        let report = TrainingReport {
            key,
            samples: temps.len(),
            windows: windows.len(),
            epochs,
            final_loss,
            fitted_last,
        };
        tracing::info!("{}", report.summary());
        Ok(report)
    }

    /// Read the artifact for a location, if one has been trained.
    ///
    /// # Errors
    /// `Artifact` when the stored bytes are corrupt or belong to another
    /// location.
    pub fn load_artifact(&self, location: &str) -> ForecastResult<Option<ModelArtifact>> {
        let key = normalize_location(location)?;
        let Some(bytes) = self.artifacts.get(&key)? else {
            return Ok(None);
        };

        let artifact = ModelArtifact::from_bytes(&bytes)?;
        if artifact.location != key {
            return Err(ForecastError::artifact(format!(
                "artifact stored for {} was trained on {}",
                key, artifact.location
            )));
        }
        Ok(Some(artifact))
    }

    /// Predict the next temperature in °C from the last `WINDOW` readings,
    /// oldest first.
    ///
    /// Returns `Ok(None)` when the location has not been trained yet.
    /// Inputs are normalized with the artifact's stored statistics.
    pub fn predict(&self, location: &str, recent_temps: &[f64; WINDOW]) -> ForecastResult<Option<f64>> {
        if recent_temps.iter().any(|t| !t.is_finite()) {
            return Err(ForecastError::InvalidInput(
                "recent temperatures must be finite".to_string(),
            ));
        }

        let Some(artifact) = self.load_artifact(location)? else {
            tracing::debug!("No model trained for {}", location);
            return Ok(None);
        };

        let stats = artifact.stats();
        let inputs = recent_temps.map(|t| stats.normalize(t));
        Ok(Some(stats.denormalize(artifact.model.forward(&inputs))))
    }

    /// Predict from the newest readings of the last few days.
    ///
    /// # Errors
    /// `InsufficientData` when fewer than `WINDOW` recent observations exist.
    pub fn predict_next(&self, location: &str) -> ForecastResult<Option<f64>> {
        let recent = self.store.history(location, RECENT_HISTORY_DAYS)?;
        if recent.len() < WINDOW {
            return Err(ForecastError::InsufficientData {
                required: WINDOW,
                actual: recent.len(),
            });
        }

        let mut window = [0.0; WINDOW];
        for (slot, stored) in window.iter_mut().zip(recent[..WINDOW].iter().rev()) {
            *slot = stored.observation.temp_c;
        }
        self.predict(location, &window)
    }
}
