//! Error types for attribute resolution and the external collaborators.

use crate::key::EntityKey;

/// Failure of a live request to the remote source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
  message: String,
}

impl TransportError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// Failure reported by a record store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StorageError {
  message: String,
}

impl StorageError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

impl From<rusqlite::Error> for StorageError {
  fn from(e: rusqlite::Error) -> Self {
    Self::new(e.to_string())
  }
}

/// Outcome of a failed attribute resolution.
///
/// Cloneable because a single fetch outcome is handed to every waiter.
/// None of these are sticky: the next access retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
  #[error("failed to fetch {key}: {source}")]
  Transport {
    key: EntityKey,
    #[source]
    source: TransportError,
  },

  #[error("{key}.{attribute} is not available offline")]
  NotAvailableOffline { key: EntityKey, attribute: String },

  #[error("failed to map {key}.{attribute}: {message}")]
  Mapping {
    key: EntityKey,
    attribute: String,
    message: String,
  },
}

impl FetchError {
  pub fn key(&self) -> &EntityKey {
    match self {
      FetchError::Transport { key, .. }
      | FetchError::NotAvailableOffline { key, .. }
      | FetchError::Mapping { key, .. } => key,
    }
  }

  pub fn is_transport(&self) -> bool {
    matches!(self, FetchError::Transport { .. })
  }

  pub fn is_not_available_offline(&self) -> bool {
    matches!(self, FetchError::NotAvailableOffline { .. })
  }

  pub fn is_mapping(&self) -> bool {
    matches!(self, FetchError::Mapping { .. })
  }
}

/// Non-fatal problems reported on the view's side channel.
///
/// These never fail a read; they signal lost durability or a degraded
/// offline read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWarning {
  /// A fetch succeeded but its snapshot could not be persisted
  SnapshotWriteFailed { key: EntityKey, error: StorageError },
  /// An offline read could not reach the record store
  SnapshotReadFailed { key: EntityKey, error: StorageError },
}
