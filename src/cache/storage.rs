//! Record store implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{RecordStore, Snapshot};
use crate::error::StorageError;
use crate::key::EntityKey;

/// Store that doesn't keep anything.
/// Used when caching is disabled - reads always miss, writes are discarded.
pub struct NoopStore;

#[async_trait]
impl RecordStore for NoopStore {
  async fn read(&self, _key: &EntityKey) -> Result<Option<Snapshot>, StorageError> {
    Ok(None) // Always miss
  }

  async fn write(&self, _key: &EntityKey, _snapshot: &Snapshot) -> Result<(), StorageError> {
    Ok(()) // Discard
  }
}

/// In-process store, lost when dropped.
#[derive(Default)]
pub struct MemoryStore {
  snapshots: Mutex<BTreeMap<EntityKey, Snapshot>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    // Inserts never panic midway, so a poisoned map is still whole
    self.snapshots.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait]
impl RecordStore for MemoryStore {
  async fn read(&self, key: &EntityKey) -> Result<Option<Snapshot>, StorageError> {
    let snapshots = self
      .snapshots
      .lock()
      .map_err(|e| StorageError::new(format!("Lock poisoned: {}", e)))?;
    Ok(snapshots.get(key).cloned())
  }

  async fn write(&self, key: &EntityKey, snapshot: &Snapshot) -> Result<(), StorageError> {
    let mut snapshots = self
      .snapshots
      .lock()
      .map_err(|e| StorageError::new(format!("Lock poisoned: {}", e)))?;
    snapshots.insert(key.clone(), snapshot.clone());
    Ok(())
  }

  async fn contains(&self, key: &EntityKey) -> Result<bool, StorageError> {
    let snapshots = self
      .snapshots
      .lock()
      .map_err(|e| StorageError::new(format!("Lock poisoned: {}", e)))?;
    Ok(snapshots.contains_key(key))
  }
}

/// SQLite-backed snapshot store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for the snapshot table.
const SNAPSHOT_SCHEMA: &str = r#"
-- One row per entity, attributes stored as a JSON object
CREATE TABLE IF NOT EXISTS snapshots (
    entity_kind TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    data BLOB NOT NULL,
    fetched_at TEXT NOT NULL,
    PRIMARY KEY (entity_kind, entity_id)
);
"#;

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self, StorageError> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at `path`.
  pub fn open_at(path: &Path) -> Result<Self, StorageError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| StorageError::new(format!("Failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      StorageError::new(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn in_memory() -> Result<Self, StorageError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, StorageError> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, StorageError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StorageError::new("Could not determine data directory"))?;

    Ok(data_dir.join("cachedview").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<(), StorageError> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| StorageError::new(format!("Lock poisoned: {}", e)))?;

    conn
      .execute_batch(SNAPSHOT_SCHEMA)
      .map_err(|e| StorageError::new(format!("Failed to run cache migrations: {}", e)))?;

    Ok(())
  }
}

#[async_trait]
impl RecordStore for SqliteStore {
  async fn read(&self, key: &EntityKey) -> Result<Option<Snapshot>, StorageError> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| StorageError::new(format!("Lock poisoned: {}", e)))?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, fetched_at FROM snapshots
         WHERE entity_kind = ? AND entity_id = ?",
        params![key.kind(), key.id()],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| StorageError::new(format!("Failed to read snapshot {}: {}", key, e)))?;

    match row {
      Some((data, fetched_at)) => {
        let attributes = serde_json::from_slice(&data)
          .map_err(|e| StorageError::new(format!("Failed to decode snapshot {}: {}", key, e)))?;
        Ok(Some(Snapshot {
          attributes,
          fetched_at: parse_datetime(&fetched_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  async fn write(&self, key: &EntityKey, snapshot: &Snapshot) -> Result<(), StorageError> {
    let data = serde_json::to_vec(&snapshot.attributes)
      .map_err(|e| StorageError::new(format!("Failed to encode snapshot {}: {}", key, e)))?;

    let conn = self
      .conn
      .lock()
      .map_err(|e| StorageError::new(format!("Lock poisoned: {}", e)))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO snapshots (entity_kind, entity_id, data, fetched_at)
         VALUES (?, ?, ?, ?)",
        params![key.kind(), key.id(), data, snapshot.fetched_at.to_rfc3339()],
      )
      .map_err(|e| StorageError::new(format!("Failed to store snapshot {}: {}", key, e)))?;

    Ok(())
  }

  async fn contains(&self, key: &EntityKey) -> Result<bool, StorageError> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| StorageError::new(format!("Lock poisoned: {}", e)))?;

    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM snapshots WHERE entity_kind = ? AND entity_id = ?",
        params![key.kind(), key.id()],
        |row| row.get(0),
      )
      .optional()?;

    Ok(found.is_some())
  }
}

/// Parse a datetime stored as RFC 3339.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StorageError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StorageError::new(format!("Failed to parse datetime '{}': {}", s, e)))
}
