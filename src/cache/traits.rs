//! Collaborator traits and the persisted snapshot type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StorageError, TransportError};
use crate::key::EntityKey;

/// Performs one live request for an entity and returns its raw payload.
///
/// Retry, backoff and timeouts belong to the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn fetch(&self, key: &EntityKey) -> Result<Value, TransportError>;
}

/// Durable storage for entity snapshots.
///
/// A snapshot written before `write` returns must be visible to later
/// `read` calls, including from a new process.
#[async_trait]
pub trait RecordStore: Send + Sync {
  async fn read(&self, key: &EntityKey) -> Result<Option<Snapshot>, StorageError>;

  async fn write(&self, key: &EntityKey, snapshot: &Snapshot) -> Result<(), StorageError>;

  async fn contains(&self, key: &EntityKey) -> Result<bool, StorageError> {
    Ok(self.read(key).await?.is_some())
  }
}

/// Persisted copy of an entity's attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  pub attributes: Map<String, Value>,
  pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
  pub fn new(attributes: Map<String, Value>) -> Self {
    Self {
      attributes,
      fetched_at: Utc::now(),
    }
  }

  pub fn get(&self, attribute: &str) -> Option<&Value> {
    self.attributes.get(attribute)
  }
}
