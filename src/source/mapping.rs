//! Conversion between raw payloads and typed attribute values.
//!
//! Pure transforms; the only failure is a payload that doesn't have the
//! expected shape.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::cache::Snapshot;
use crate::error::FetchError;
use crate::key::EntityKey;

/// Turn a raw transport payload into a snapshot.
///
/// The payload must be a JSON object whose members are the entity's
/// attributes.
pub fn snapshot_from_payload(payload: Value) -> Result<Snapshot, String> {
  match payload {
    Value::Object(attributes) => Ok(Snapshot::new(attributes)),
    other => Err(format!("expected a JSON object, found {}", kind_of(&other))),
  }
}

/// Decode one attribute. A missing attribute decodes as `null`, so optional
/// attributes resolve to `None`.
pub fn decode_attribute<T: DeserializeOwned>(
  key: &EntityKey,
  attribute: &str,
  raw: Option<&Value>,
) -> Result<T, FetchError> {
  let raw = raw.cloned().unwrap_or(Value::Null);
  serde_json::from_value(raw).map_err(|e| FetchError::Mapping {
    key: key.clone(),
    attribute: attribute.to_string(),
    message: e.to_string(),
  })
}

pub fn encode_attribute<T: Serialize>(
  key: &EntityKey,
  attribute: &str,
  value: &T,
) -> Result<Value, FetchError> {
  serde_json::to_value(value).map_err(|e| FetchError::Mapping {
    key: key.clone(),
    attribute: attribute.to_string(),
    message: e.to_string(),
  })
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_payload_must_be_object() {
    let snapshot = snapshot_from_payload(json!({ "name": "Alice" })).unwrap();
    assert_eq!(snapshot.get("name"), Some(&json!("Alice")));

    let err = snapshot_from_payload(json!(["Alice"])).unwrap_err();
    assert_eq!(err, "expected a JSON object, found an array");
  }

  #[test]
  fn test_missing_attribute_decodes_as_none() {
    let key = EntityKey::new("user", "1");
    let email: Option<String> = decode_attribute(&key, "email", None).unwrap();
    assert_eq!(email, None);
  }

  #[test]
  fn test_type_mismatch_is_mapping_error() {
    let key = EntityKey::new("user", "1");
    let err = decode_attribute::<u32>(&key, "age", Some(&json!("old"))).unwrap_err();
    assert!(err.is_mapping());
    assert_eq!(err.key(), &key);
  }
}
