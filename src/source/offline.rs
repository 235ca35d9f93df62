//! Transport for views that have no remote source configured.

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::Transport;
use crate::error::TransportError;
use crate::key::EntityKey;

/// Refuses every request. Offline views never call it; switching such a
/// view online turns every miss into a transport error.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnreachableTransport;

#[async_trait]
impl Transport for UnreachableTransport {
  async fn fetch(&self, key: &EntityKey) -> Result<Value, TransportError> {
    Err(TransportError::new(format!(
      "no source configured, cannot fetch {}",
      key
    )))
  }
}
