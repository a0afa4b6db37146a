//! Persisted last-known status.
//!
//! A single record, keyed by [`LAST_KNOWN_STATUS_KEY`], holds the JSON form of
//! the most recent [`StatusSnapshot`]. Each save overwrites it.
//!
//! Storage problems never reach the caller: a record that is missing or fails
//! to deserialize loads as `None`, and a failed write is logged and dropped.

use crate::persist::write_atomic;
use crate::state::StatusSnapshot;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Fixed key of the status record.
pub const LAST_KNOWN_STATUS_KEY: &str = "lastKnownStatus";

/// Durable storage for the last known status.
pub trait StatusStore: Send + Sync {
    /// Load the stored snapshot, or `None` if absent or unreadable.
    fn load(&self) -> Option<StatusSnapshot>;

    /// Overwrite the stored snapshot. Failures are logged, not returned.
    fn save(&self, snapshot: &StatusSnapshot);
}

/// JSON file store: `<dir>/lastKnownStatus.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store the record inside `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir
                .as_ref()
                .join(format!("{LAST_KNOWN_STATUS_KEY}.json")),
        }
    }

    /// Path of the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }

}

impl StatusStore for JsonFileStore {
    fn load(&self) -> Option<StatusSnapshot> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) => {
                debug!("no stored status at {}: {e}", self.path.display());
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(
                    "ignoring unreadable status record {}: {e}",
                    self.path.display()
                );
                None
            }
        }
    }

    fn save(&self, snapshot: &StatusSnapshot) {
        let json = match serde_json::to_string_pretty(snapshot) {
            Ok(j) => j,
            Err(e) => {
                warn!("cannot serialize status snapshot: {e}");
                return;
            }
        };

        if let Err(e) = write_atomic(&self.path, json.as_bytes()) {
            warn!(
                "cannot persist status snapshot to {}: {e}",
                self.path.display()
            );
        }
    }
}

/// In-memory store holding the serialized record.
///
/// Keeps the JSON text rather than the struct so loads exercise the same
/// deserialization path as the file store.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    payload: Mutex<Option<String>>,
}

impl MemoryStatusStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a raw payload, valid or not.
    pub fn with_payload(raw: impl Into<String>) -> Self {
        Self {
            payload: Mutex::new(Some(raw.into())),
        }
    }

    /// Raw stored payload.
    pub fn payload(&self) -> Option<String> {
        self.payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StatusStore for MemoryStatusStore {
    fn load(&self) -> Option<StatusSnapshot> {
        let raw = self.payload()?;
        serde_json::from_str(&raw)
            .map_err(|e| warn!("ignoring unreadable status record: {e}"))
            .ok()
    }

    fn save(&self, snapshot: &StatusSnapshot) {
        match serde_json::to_string(snapshot) {
            Ok(json) => {
                *self.payload.lock().unwrap_or_else(PoisonError::into_inner) = Some(json);
            }
            Err(e) => warn!("cannot serialize status snapshot: {e}"),
        }
    }
}
