//! Model artifacts and the key-value store that holds them.
//!
//! An artifact is only meaningful together with the normalization
//! statistics it was trained with, so both travel in one record and are
//! written with a single atomic put.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{ForecastError, ForecastResult};
use crate::model::SequenceModel;
use crate::normalize::NormalizationStats;

/// A trained model scoped to one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Normalized location name the model was trained on
    pub location: String,
    pub model: SequenceModel,
    pub mean: f64,
    pub std: f64,
    pub trained_at: DateTime<Utc>,
    /// Observations used for training
    pub samples: usize,
    pub final_loss: f64,
}

impl ModelArtifact {
    pub fn stats(&self) -> NormalizationStats {
        NormalizationStats {
            mean: self.mean,
            std: self.std,
        }
    }

    pub fn to_bytes(&self) -> ForecastResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| ForecastError::artifact(format!("failed to encode artifact: {e}")))
    }

    /// Decode and sanity-check a stored artifact.
    ///
    /// # Errors
    /// Returns `ForecastError::Artifact` for malformed JSON, inconsistent
    /// weights or statistics that cannot be inverted.
    pub fn from_bytes(bytes: &[u8]) -> ForecastResult<Self> {
        let artifact: Self = serde_json::from_slice(bytes)
            .map_err(|e| ForecastError::artifact(format!("failed to decode artifact: {e}")))?;
        artifact.model.check()?;
        artifact
            .stats()
            .check()
            .map_err(|e| ForecastError::artifact(format!("invalid normalization statistics: {e}")))?;
        Ok(artifact)
    }
}

/// Key-value byte store for artifacts, keyed by normalized location name.
///
/// `put` must replace the value atomically: a concurrent `get` returns
/// either the old bytes or the new bytes, never a mix.
pub trait ArtifactStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> ForecastResult<()>;

    /// Returns `None` when nothing is stored under `key`.
    fn get(&self, key: &str) -> ForecastResult<Option<Vec<u8>>>;
}

/// Artifacts as JSON files in a directory.
///
/// Writes go to a temporary file in the same directory which is then
/// renamed over the target.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    dir: PathBuf,
}

impl FileArtifactStore {
    /// Use (and create if needed) `dir` for artifacts.
    pub fn new(dir: impl Into<PathBuf>) -> ForecastResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that holds the artifact for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}_rnn.json", encode_key(key)))
    }
}

/// Keep keys filesystem-safe: anything but ASCII alphanumerics, `-` and `_`
/// is percent-encoded.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

impl ArtifactStore for FileArtifactStore {
    fn put(&self, key: &str, bytes: &[u8]) -> ForecastResult<()> {
        let target = self.path_for(key);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;

        tracing::debug!("Wrote artifact for {} to {}", key, target.display());
        Ok(())
    }

    fn get(&self, key: &str) -> ForecastResult<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process artifact store.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, key: &str, bytes: &[u8]) -> ForecastResult<()> {
        self.entries.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> ForecastResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }
}
