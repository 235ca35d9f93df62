//! Typed and schemaless entity models.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::attribute::{AttributeValue, CachedAttribute};
use super::ViewCore;
use crate::key::EntityKey;

/// An entity type with a fixed set of cached attributes.
///
/// ```ignore
/// struct User {
///   name: CachedAttribute<String>,
/// }
///
/// impl Model for User {
///   const KIND: &'static str = "user";
///
///   fn bind(entity: &EntityHandle) -> Self {
///     Self { name: entity.attribute("name") }
///   }
/// }
/// ```
pub trait Model: Send + Sync + Sized + 'static {
  /// Kind half of the entity key, also the remote endpoint name.
  const KIND: &'static str;

  /// Build an instance with every attribute unresolved.
  fn bind(entity: &EntityHandle) -> Self;
}

/// Passed to [`Model::bind`] to create the model's attributes.
pub struct EntityHandle {
  key: EntityKey,
  core: Arc<ViewCore>,
}

impl EntityHandle {
  pub(crate) fn new(key: EntityKey, core: Arc<ViewCore>) -> Self {
    Self { key, core }
  }

  pub fn key(&self) -> &EntityKey {
    &self.key
  }

  pub fn attribute<T: AttributeValue>(&self, name: &str) -> CachedAttribute<T> {
    CachedAttribute::new(self.key.clone(), name, Arc::clone(&self.core))
  }
}

/// Entity of any kind whose attributes are looked up by name as raw JSON.
pub struct Document {
  handle: EntityHandle,
  attributes: Mutex<HashMap<String, CachedAttribute<Value>>>,
}

impl Document {
  pub(crate) fn new(handle: EntityHandle) -> Self {
    Self {
      handle,
      attributes: Mutex::new(HashMap::new()),
    }
  }

  pub fn key(&self) -> &EntityKey {
    self.handle.key()
  }

  /// The attribute called `name`, created unresolved on first use.
  pub fn attribute(&self, name: &str) -> CachedAttribute<Value> {
    let mut attributes = self.attributes.lock().unwrap_or_else(|e| e.into_inner());
    attributes
      .entry(name.to_string())
      .or_insert_with(|| self.handle.attribute(name))
      .clone()
  }
}
