//! SQLite-based observation storage.
//!
//! `ObservationStore` is the one shared mutable resource of the application.
//! It wraps a single SQLite connection in a mutex: appends from the alert
//! scheduler and reads from interactive callers are serialized, every write
//! runs inside a transaction, and readers never see a partial record.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use skycast_weather::{Observation, RawObservation};

use crate::error::StoreResult;
use crate::location::{normalize_location, Location};

const OBSERVATION_COLUMNS: &str = "o.id, l.name, o.timestamp_ms, o.temp_c, o.temp_f, o.humidity, \
     o.wind_speed_kmph, o.condition_text, o.source";

/// An observation as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObservation {
    pub id: i64,
    /// Normalized location name
    pub location: String,
    pub observation: Observation,
}

/// Thread-safe handle to the observation database.
///
/// Cloning is cheap and every clone shares the same connection.
#[derive(Clone)]
pub struct ObservationStore {
    conn: Arc<Mutex<Connection>>,
}

impl ObservationStore {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (for tests and throwaway sessions).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> StoreResult<()> {
        self.conn.lock().execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                country TEXT
            );

            CREATE TABLE IF NOT EXISTS observations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                location_id INTEGER NOT NULL REFERENCES locations(id),
                timestamp_ms INTEGER NOT NULL,
                temp_c REAL NOT NULL,
                temp_f REAL NOT NULL,
                humidity REAL NOT NULL,
                wind_speed_kmph REAL NOT NULL,
                condition_text TEXT NOT NULL,
                source TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_observations_location_time
                ON observations(location_id, timestamp_ms DESC);
            "#,
        )?;
        Ok(())
    }

    /// Append an observation for a location, creating the location if needed.
    ///
    /// # Errors
    /// Returns `StoreError::Validation` for a blank name or invalid numeric
    /// fields; nothing is written in that case.
    pub fn save(&self, location: &str, observation: &Observation) -> StoreResult<StoredObservation> {
        self.save_with_country(location, observation, None)
    }

    /// Like [`save`](Self::save), also recording the country if the location
    /// does not have one yet.
    pub fn save_with_country(
        &self,
        location: &str,
        observation: &Observation,
        country: Option<&str>,
    ) -> StoreResult<StoredObservation> {
        let name = normalize_location(location)?;
        observation.validate()?;

        let timestamp_ms = observation.timestamp.timestamp_millis();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let location_id = Self::get_or_create_location(&tx, &name, country)?;
        tx.execute(
            r#"
            INSERT INTO observations
            (location_id, timestamp_ms, temp_c, temp_f, humidity, wind_speed_kmph, condition_text, source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                location_id,
                timestamp_ms,
                observation.temp_c,
                observation.temp_f,
                observation.humidity,
                observation.wind_speed_kmph,
                observation.condition_text,
                observation.source,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::debug!("Saved observation {} for {}", id, name);

        let mut stored = observation.clone();
        stored.timestamp = from_millis(timestamp_ms)?;
        Ok(StoredObservation {
            id,
            location: name,
            observation: stored,
        })
    }

    /// Parse a raw observation and append it.
    ///
    /// A single unparsable field rejects the whole record.
    pub fn save_raw(&self, location: &str, raw: &RawObservation) -> StoreResult<StoredObservation> {
        let observation = raw.parse()?;
        self.save(location, &observation)
    }

    fn get_or_create_location(tx: &Transaction<'_>, name: &str, country: Option<&str>) -> StoreResult<i64> {
        tx.execute(
            r#"
            INSERT INTO locations (name, country) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET country = COALESCE(locations.country, excluded.country)
            "#,
            params![name, country],
        )?;
        let id = tx.query_row("SELECT id FROM locations WHERE name = ?1", params![name], |row| {
            row.get(0)
        })?;
        Ok(id)
    }

    /// Observations from the last `window_days` days, newest first.
    ///
    /// An unknown or blank location yields an empty list.
    pub fn history(&self, location: &str, window_days: u32) -> StoreResult<Vec<StoredObservation>> {
        let Some(name) = lookup_key(location) else {
            return Ok(Vec::new());
        };
        let since = Utc::now() - Duration::days(i64::from(window_days));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS}
             FROM observations o JOIN locations l ON l.id = o.location_id
             WHERE l.name = ?1 AND o.timestamp_ms >= ?2
             ORDER BY o.timestamp_ms DESC, o.id DESC"
        ))?;
        let rows = stmt.query_map(params![name, since.timestamp_millis()], row_to_observation)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The newest `limit` observations regardless of age, newest first.
    pub fn latest(&self, location: &str, limit: usize) -> StoreResult<Vec<StoredObservation>> {
        let Some(name) = lookup_key(location) else {
            return Ok(Vec::new());
        };

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS}
             FROM observations o JOIN locations l ON l.id = o.location_id
             WHERE l.name = ?1
             ORDER BY o.timestamp_ms DESC, o.id DESC
             LIMIT ?2"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![name, limit], row_to_observation)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Look up a location by name.
    pub fn location(&self, location: &str) -> StoreResult<Option<Location>> {
        let Some(name) = lookup_key(location) else {
            return Ok(None);
        };
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT id, name, country FROM locations WHERE name = ?1",
                params![name],
                row_to_location,
            )
            .optional()?;
        Ok(found)
    }

    /// All known locations, sorted by name.
    pub fn locations(&self) -> StoreResult<Vec<Location>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name, country FROM locations ORDER BY name")?;
        let rows = stmt.query_map([], row_to_location)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Number of observations stored for a location.
    pub fn count(&self, location: &str) -> StoreResult<usize> {
        let Some(name) = lookup_key(location) else {
            return Ok(0);
        };
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM observations o JOIN locations l ON l.id = o.location_id
             WHERE l.name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Key for read paths: a blank name matches no location.
fn lookup_key(location: &str) -> Option<String> {
    normalize_location(location).ok()
}

fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(2, ms))
}

fn row_to_observation(row: &rusqlite::Row) -> rusqlite::Result<StoredObservation> {
    let timestamp_ms: i64 = row.get(2)?;
    Ok(StoredObservation {
        id: row.get(0)?,
        location: row.get(1)?,
        observation: Observation {
            timestamp: from_millis(timestamp_ms)?,
            temp_c: row.get(3)?,
            temp_f: row.get(4)?,
            humidity: row.get(5)?,
            wind_speed_kmph: row.get(6)?,
            condition_text: row.get(7)?,
            source: row.get(8)?,
        },
    })
}

fn row_to_location(row: &rusqlite::Row) -> rusqlite::Result<Location> {
    Ok(Location {
        id: row.get(0)?,
        name: row.get(1)?,
        country: row.get(2)?,
    })
}
