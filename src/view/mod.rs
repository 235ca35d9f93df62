//! The cached view: identity map, online/offline switch, and routing of
//! attribute reads to the fetch coordinator.

mod attribute;
mod model;

use chrono::Duration;
use serde::Deserialize;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::cache::{FetchCoordinator, RecordStore, Snapshot, Transport};
use crate::error::{CacheWarning, FetchError, StorageError};
use crate::key::{EntityKey, EntityRef};

pub use attribute::{AttributeValue, CachedAttribute};
pub use model::{Document, EntityHandle, Model};

/// Whether cache misses go to the network or only to the record store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
  #[default]
  Online,
  Offline,
}

/// Options for building a view.
#[derive(Debug, Clone, Default)]
pub struct ViewOptions {
  pub mode: ViewMode,
  /// Resolved values older than this are fetched again when online
  pub stale_after: Option<Duration>,
}

/// State shared between a view and every attribute it hands out.
pub(crate) struct ViewCore {
  pub(crate) coordinator: Arc<FetchCoordinator>,
  pub(crate) stale_after: Option<Duration>,
  offline: AtomicBool,
}

impl ViewCore {
  pub(crate) fn mode(&self) -> ViewMode {
    if self.offline.load(Ordering::SeqCst) {
      ViewMode::Offline
    } else {
      ViewMode::Online
    }
  }
}

type IdentityMap = HashMap<(EntityKey, TypeId), Arc<dyn Any + Send + Sync>>;

/// Object graph over remote entities.
///
/// Hands out one shared instance per entity key and model type, and decides
/// per read whether a miss reaches the transport (online) or only the
/// record store (offline). Attribute failures stay with the attribute; the
/// view remains usable after any of them.
pub struct CachedView {
  core: Arc<ViewCore>,
  identity: Mutex<IdentityMap>,
}

impl CachedView {
  pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn RecordStore>) -> Self {
    Self::with_options(transport, store, ViewOptions::default())
  }

  pub fn with_options(
    transport: Arc<dyn Transport>,
    store: Arc<dyn RecordStore>,
    options: ViewOptions,
  ) -> Self {
    let core = ViewCore {
      coordinator: Arc::new(FetchCoordinator::new(transport, store)),
      stale_after: options.stale_after,
      offline: AtomicBool::new(options.mode == ViewMode::Offline),
    };
    Self {
      core: Arc::new(core),
      identity: Mutex::new(HashMap::new()),
    }
  }

  pub fn mode(&self) -> ViewMode {
    self.core.mode()
  }

  /// Switch modes. Slot state is kept; the switch applies to the next
  /// resolution of any unresolved attribute.
  pub fn set_mode(&self, mode: ViewMode) {
    let previous = self.core.mode();
    self
      .core
      .offline
      .store(mode == ViewMode::Offline, Ordering::SeqCst);
    if previous != mode {
      info!(?previous, ?mode, "view mode changed");
    }
  }

  /// Subscribe to non-fatal storage problems.
  pub fn warnings(&self) -> broadcast::Receiver<CacheWarning> {
    self.core.coordinator.subscribe_warnings()
  }

  /// The shared `M` instance for `id`, created unresolved on first use.
  pub fn entity<M: Model>(&self, id: impl Into<String>) -> Arc<M> {
    self.obtain(EntityKey::new(M::KIND, id), |handle| M::bind(&handle))
  }

  /// Follow a reference stored in an attribute value.
  pub fn resolve<M: Model>(&self, reference: &EntityRef<M>) -> Arc<M> {
    self.obtain(reference.key(), |handle| M::bind(&handle))
  }

  /// Schemaless access to any entity.
  pub fn document(&self, key: &EntityKey) -> Arc<Document> {
    self.obtain(key.clone(), Document::new)
  }

  /// Re-fetch one attribute of a document, bypassing the memoized value.
  pub async fn refresh(&self, key: &EntityKey, attribute: &str) -> Result<Value, FetchError> {
    self.document(key).attribute(attribute).refresh().await
  }

  /// The persisted snapshot for `key`. Never touches the network.
  pub async fn snapshot(&self, key: &EntityKey) -> Result<Option<Snapshot>, StorageError> {
    self.core.coordinator.store().read(key).await
  }

  fn obtain<E, F>(&self, key: EntityKey, build: F) -> Arc<E>
  where
    E: Send + Sync + 'static,
    F: FnOnce(EntityHandle) -> E,
  {
    let mut identity = self.identity.lock().unwrap_or_else(|e| e.into_inner());
    let slot_key = (key, TypeId::of::<E>());

    if let Some(existing) = identity.get(&slot_key) {
      if let Ok(entity) = Arc::clone(existing).downcast::<E>() {
        return entity;
      }
    }

    debug!(key = %slot_key.0, "registering entity");
    let handle = EntityHandle::new(slot_key.0.clone(), Arc::clone(&self.core));
    let entity = Arc::new(build(handle));
    identity.insert(slot_key, Arc::clone(&entity) as Arc<dyn Any + Send + Sync>);
    entity
  }
}
