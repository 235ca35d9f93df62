//! Fetch coordinator: deduplicated transport calls and snapshot persistence.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use super::traits::{RecordStore, Snapshot, Transport};
use crate::error::{CacheWarning, FetchError, StorageError, TransportError};
use crate::key::EntityKey;
use crate::source::mapping;

/// Capacity of the warning side channel; slow subscribers miss old warnings.
const WARNING_CAPACITY: usize = 64;

/// Why a key-level fetch failed, before it is attributed to an attribute.
#[derive(Debug, Clone)]
pub(crate) enum FetchFailure {
  Transport(TransportError),
  Payload(String),
}

impl FetchFailure {
  pub(crate) fn into_error(self, key: &EntityKey, attribute: &str) -> FetchError {
    match self {
      FetchFailure::Transport(source) => FetchError::Transport {
        key: key.clone(),
        source,
      },
      FetchFailure::Payload(message) => FetchError::Mapping {
        key: key.clone(),
        attribute: attribute.to_string(),
        message,
      },
    }
  }
}

pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Snapshot>, FetchFailure>>>;

struct InFlight {
  id: u64,
  fetch: SharedFetch,
}

/// Ordering of the store writes for one key.
///
/// Fetches and primes draw sequence numbers from one counter when they
/// start; the store only ever moves forward in that order.
#[derive(Default)]
struct WriteState {
  /// Sequence of the newest fetch whose snapshot was persisted
  persisted: Option<u64>,
  /// Primed values not yet covered by a newer persisted fetch
  primed: HashMap<String, (u64, Value)>,
}

/// Deduplicates transport calls per entity key.
///
/// Every fetch runs in its own task, so a reader that gives up waiting does
/// not cancel the request other readers depend on. A successful fetch is
/// persisted to the record store exactly once.
pub struct FetchCoordinator {
  transport: Arc<dyn Transport>,
  store: Arc<dyn RecordStore>,
  in_flight: Mutex<HashMap<EntityKey, InFlight>>,
  writes: Mutex<HashMap<EntityKey, Arc<AsyncMutex<WriteState>>>>,
  next_id: AtomicU64,
  warnings: broadcast::Sender<CacheWarning>,
}

impl FetchCoordinator {
  pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn RecordStore>) -> Self {
    let (warnings, _) = broadcast::channel(WARNING_CAPACITY);
    Self {
      transport,
      store,
      in_flight: Mutex::new(HashMap::new()),
      writes: Mutex::new(HashMap::new()),
      next_id: AtomicU64::new(0),
      warnings,
    }
  }

  pub fn store(&self) -> &Arc<dyn RecordStore> {
    &self.store
  }

  pub fn subscribe_warnings(&self) -> broadcast::Receiver<CacheWarning> {
    self.warnings.subscribe()
  }

  fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<EntityKey, InFlight>> {
    self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn write_state(&self, key: &EntityKey) -> Arc<AsyncMutex<WriteState>> {
    let mut writes = self.writes.lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(writes.entry(key.clone()).or_default())
  }

  /// Whether a transport call for `key` is currently running.
  pub fn is_in_flight(&self, key: &EntityKey) -> bool {
    self.lock_in_flight().contains_key(key)
  }

  /// Join the running fetch for `key`, or start one.
  ///
  /// Must be called from within a tokio runtime.
  pub(crate) fn fetch(self: &Arc<Self>, key: &EntityKey) -> SharedFetch {
    let mut in_flight = self.lock_in_flight();

    if let Some(running) = in_flight.get(key) {
      debug!(%key, "joining in-flight fetch");
      return running.fetch.clone();
    }

    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let this = Arc::clone(self);
    let task_key = key.clone();
    let handle = tokio::spawn(async move {
      let outcome = this.run_fetch(&task_key, id).await;
      this.finish(&task_key, id);
      outcome
    });

    let fetch = async move {
      handle.await.unwrap_or_else(|e| {
        Err(FetchFailure::Transport(TransportError::new(format!(
          "fetch task failed: {}",
          e
        ))))
      })
    }
    .boxed()
    .shared();

    in_flight.insert(
      key.clone(),
      InFlight {
        id,
        fetch: fetch.clone(),
      },
    );
    fetch
  }

  /// Stop routing new readers of `key` to the running fetch.
  ///
  /// Readers already waiting still get its outcome; the next reader starts a
  /// fresh request.
  pub(crate) fn detach(&self, key: &EntityKey) {
    if self.lock_in_flight().remove(key).is_some() {
      debug!(%key, "detached in-flight fetch");
    }
  }

  fn finish(&self, key: &EntityKey, id: u64) {
    let mut in_flight = self.lock_in_flight();
    // A detached fetch may have been replaced by a newer one
    if in_flight.get(key).is_some_and(|running| running.id == id) {
      in_flight.remove(key);
    }
  }

  async fn run_fetch(&self, key: &EntityKey, id: u64) -> Result<Arc<Snapshot>, FetchFailure> {
    info!(%key, "fetching from source");

    let payload = match self.transport.fetch(key).await {
      Ok(payload) => payload,
      Err(e) => {
        info!(%key, error = %e, "fetch failed");
        return Err(FetchFailure::Transport(e));
      }
    };
    let snapshot = mapping::snapshot_from_payload(payload).map_err(FetchFailure::Payload)?;

    // Losing durability must not fail the readers waiting on this value
    self.persist_fetched(key, id, &snapshot).await;

    info!(%key, attributes = snapshot.attributes.len(), "fetched");
    Ok(Arc::new(snapshot))
  }

  /// Write a fetched snapshot unless a later-started fetch already did.
  ///
  /// Values primed after this fetch started are carried over, since the
  /// payload predates them.
  async fn persist_fetched(&self, key: &EntityKey, id: u64, snapshot: &Snapshot) {
    let lock = self.write_state(key);
    let mut state = lock.lock().await;

    if state.persisted.is_some_and(|newest| newest > id) {
      debug!(%key, id, "skipping write of superseded fetch");
      return;
    }

    let mut stored = snapshot.clone();
    for (attribute, (sequence, value)) in &state.primed {
      if *sequence > id {
        stored.attributes.insert(attribute.clone(), value.clone());
      }
    }

    match self.store.write(key, &stored).await {
      Ok(()) => {
        state.persisted = Some(id);
        state.primed.retain(|_, (sequence, _)| *sequence > id);
      }
      Err(error) => self.report_write_failure(key, error),
    }
  }

  /// Read one attribute from the record store without touching the network.
  pub(crate) async fn read_offline(
    &self,
    key: &EntityKey,
    attribute: &str,
  ) -> Result<Value, FetchError> {
    let not_available = || FetchError::NotAvailableOffline {
      key: key.clone(),
      attribute: attribute.to_string(),
    };

    match self.store.read(key).await {
      Ok(Some(snapshot)) => snapshot.get(attribute).cloned().ok_or_else(not_available),
      Ok(None) => {
        debug!(%key, attribute, "no snapshot stored");
        Err(not_available())
      }
      Err(error) => {
        warn!(%key, %error, "failed to read snapshot");
        let _ = self.warnings.send(CacheWarning::SnapshotReadFailed {
          key: key.clone(),
          error,
        });
        Err(not_available())
      }
    }
  }

  /// Merge one attribute value into the stored snapshot.
  ///
  /// Holds the key's write lock across the read and the write, so a fetch
  /// completing meanwhile cannot be overwritten with the older snapshot.
  pub(crate) async fn persist_attribute(&self, key: &EntityKey, attribute: &str, value: Value) {
    let sequence = self.next_id.fetch_add(1, Ordering::Relaxed);
    let lock = self.write_state(key);
    let mut state = lock.lock().await;
    state
      .primed
      .insert(attribute.to_string(), (sequence, value.clone()));

    let existing = match self.store.read(key).await {
      Ok(existing) => existing,
      Err(error) => {
        // Writing a partial snapshot here would drop the other attributes
        self.report_write_failure(key, error);
        return;
      }
    };

    let mut snapshot = existing.unwrap_or_else(|| Snapshot::new(Default::default()));
    snapshot.attributes.insert(attribute.to_string(), value);

    if let Err(error) = self.store.write(key, &snapshot).await {
      self.report_write_failure(key, error);
    }
  }

  fn report_write_failure(&self, key: &EntityKey, error: StorageError) {
    warn!(%key, %error, "failed to persist snapshot");
    let _ = self.warnings.send(CacheWarning::SnapshotWriteFailed {
      key: key.clone(),
      error,
    });
  }
}
