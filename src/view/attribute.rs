//! Lazily resolved, memoized entity attributes.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::ViewCore;
use crate::cache::slot::{SharedOutcome, SlotCell, SlotState, Step};
use crate::error::{FetchError, TransportError};
use crate::key::EntityKey;
use crate::source::mapping;

/// Bounds every attribute value type satisfies.
pub trait AttributeValue: Clone + Send + Sync + DeserializeOwned + Serialize + 'static {}

impl<T> AttributeValue for T where T: Clone + Send + Sync + DeserializeOwned + Serialize + 'static {}

/// One attribute of one entity.
///
/// The first `get` resolves the value through the owning view (network when
/// online, record store when offline); later calls return the memoized
/// value until `invalidate`. Clones share the same slot.
pub struct CachedAttribute<T> {
  key: EntityKey,
  name: Arc<str>,
  slot: Arc<SlotCell<T>>,
  core: Arc<ViewCore>,
}

impl<T> Clone for CachedAttribute<T> {
  fn clone(&self) -> Self {
    Self {
      key: self.key.clone(),
      name: Arc::clone(&self.name),
      slot: Arc::clone(&self.slot),
      core: Arc::clone(&self.core),
    }
  }
}

impl<T> fmt::Debug for CachedAttribute<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "CachedAttribute({}.{})", self.key, self.name)
  }
}

impl<T: AttributeValue> CachedAttribute<T> {
  pub(crate) fn new(key: EntityKey, name: &str, core: Arc<ViewCore>) -> Self {
    Self {
      key,
      name: Arc::from(name),
      slot: Arc::new(SlotCell::new()),
      core,
    }
  }

  pub fn key(&self) -> &EntityKey {
    &self.key
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Resolve the value, suspending until it is available.
  pub async fn get(&self) -> Result<T, FetchError> {
    let mode = self.core.mode();
    let step = self
      .slot
      .acquire(mode, self.core.stale_after, |generation| self.start_fetch(generation));

    match step {
      Step::Ready(value) => {
        debug!(key = %self.key, attribute = %self.name, "cache hit");
        Ok(value)
      }
      Step::Wait(outcome) => outcome.await,
      Step::ReadOffline(generation) => {
        let outcome = self
          .core
          .coordinator
          .read_offline(&self.key, &self.name)
          .await
          .and_then(|raw| mapping::decode_attribute(&self.key, &self.name, Some(&raw)));
        self.slot.finish_offline(generation, &outcome);
        outcome
      }
    }
  }

  /// Current value if resolved. Never starts a fetch.
  pub fn peek(&self) -> Option<T> {
    self.slot.peek()
  }

  pub fn state(&self) -> SlotState {
    self.slot.state()
  }

  /// Error of the last attempt, while the slot is Failed.
  pub fn last_error(&self) -> Option<FetchError> {
    self.slot.last_error()
  }

  pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
    self.slot.resolved_at()
  }

  /// Forget the memoized value so the next `get` resolves again.
  ///
  /// Readers already waiting on an in-flight fetch still receive its
  /// result. Any fetch for the key that is already running, including one
  /// started by a sibling attribute, is detached so the next `get` issues
  /// a new request. The stored snapshot is kept.
  pub fn invalidate(&self) {
    self.slot.invalidate();
    self.core.coordinator.detach(&self.key);
    debug!(key = %self.key, attribute = %self.name, "invalidated");
  }

  /// `invalidate` followed by `get`.
  pub async fn refresh(&self) -> Result<T, FetchError> {
    self.invalidate();
    self.get().await
  }

  /// Install a value obtained together with another entity and persist it
  /// into this entity's snapshot.
  pub async fn prime(&self, value: T) -> Result<(), FetchError> {
    let raw = mapping::encode_attribute(&self.key, &self.name, &value)?;
    self.slot.prime(value);
    self
      .core
      .coordinator
      .persist_attribute(&self.key, &self.name, raw)
      .await;
    Ok(())
  }

  /// Spawn the attribute-level resolution on top of the key-level fetch.
  ///
  /// Runs in its own task so the slot settles even if every reader is
  /// cancelled.
  fn start_fetch(&self, generation: u64) -> SharedOutcome<T> {
    let fetch = self.core.coordinator.fetch(&self.key);
    let slot = Arc::clone(&self.slot);
    let key = self.key.clone();
    let name = Arc::clone(&self.name);

    let handle = tokio::spawn(async move {
      let outcome = match fetch.await {
        Ok(snapshot) => mapping::decode_attribute(&key, &name, snapshot.get(&name)),
        Err(failure) => Err(failure.into_error(&key, &name)),
      };
      slot.finish_fetch(generation, &outcome);
      outcome
    });

    let key = self.key.clone();
    async move {
      handle.await.unwrap_or_else(|e| {
        Err(FetchError::Transport {
          key,
          source: TransportError::new(format!("fetch task failed: {}", e)),
        })
      })
    }
    .boxed()
    .shared()
  }
}
