//! Entity identity types.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use crate::view::Model;

/// Identifier of one remote entity: a kind (e.g. "user") plus its remote id.
///
/// Used as the key of both the in-memory identity map and the record store.
/// Displayed and parsed as `kind:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
  kind: String,
  id: String,
}

impl EntityKey {
  pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      id: id.into(),
    }
  }

  pub fn kind(&self) -> &str {
    &self.kind
  }

  pub fn id(&self) -> &str {
    &self.id
  }
}

impl fmt::Display for EntityKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.kind, self.id)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid entity key '{0}', expected kind:id")]
pub struct ParseKeyError(String);

impl FromStr for EntityKey {
  type Err = ParseKeyError;

  /// Splits on the first `:` so ids may themselves contain colons.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.split_once(':') {
      Some((kind, id)) if !kind.is_empty() && !id.is_empty() => Ok(Self::new(kind, id)),
      _ => Err(ParseKeyError(s.to_string())),
    }
  }
}

/// Typed reference to another entity, stored inside attribute values.
///
/// Serializes as the bare remote id; the kind comes from the model.
/// Resolve it with [`crate::CachedView::resolve`] to get the shared instance.
pub struct EntityRef<M> {
  id: String,
  _model: PhantomData<fn() -> M>,
}

impl<M: Model> EntityRef<M> {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      _model: PhantomData,
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn key(&self) -> EntityKey {
    EntityKey::new(M::KIND, self.id.clone())
  }
}

impl<M> Clone for EntityRef<M> {
  fn clone(&self) -> Self {
    Self {
      id: self.id.clone(),
      _model: PhantomData,
    }
  }
}

impl<M> PartialEq for EntityRef<M> {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl<M> Eq for EntityRef<M> {}

impl<M> fmt::Debug for EntityRef<M> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("EntityRef").field(&self.id).finish()
  }
}

impl<M> Serialize for EntityRef<M> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.id)
  }
}

impl<'de, M> Deserialize<'de> for EntityRef<M> {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    // Remote sources are inconsistent about numeric vs string ids
    let value = serde_json::Value::deserialize(deserializer)?;
    let id = match value {
      serde_json::Value::String(s) => s,
      serde_json::Value::Number(n) => n.to_string(),
      other => {
        return Err(serde::de::Error::custom(format!(
          "expected entity id, found {}",
          other
        )))
      }
    };
    Ok(Self {
      id,
      _model: PhantomData,
    })
  }
}
