//! Durable per-location time series of weather observations.

pub mod error;
pub mod location;
pub mod observation_store;

pub use error::{StoreError, StoreResult};
pub use location::{normalize_location, Location};
pub use observation_store::{ObservationStore, StoredObservation};
