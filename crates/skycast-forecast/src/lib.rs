//! Short-horizon temperature forecasting for Skycast
//!
//! Trains a compact recurrent model per location from the observation
//! store, persists it together with its normalization statistics, and
//! serves next-value predictions from that artifact.

pub mod artifact;
pub mod error;
pub mod forecaster;
pub mod model;
pub mod normalize;
pub mod window;

pub use artifact::{ArtifactStore, FileArtifactStore, MemoryArtifactStore, ModelArtifact};
pub use error::{ForecastError, ForecastResult};
pub use forecaster::{Forecaster, ForecasterConfig, TrainingReport};
pub use model::SequenceModel;
pub use normalize::NormalizationStats;
pub use window::{build_windows, Window, WINDOW};
