//! HTTP transport for JSON entity endpoints.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::cache::Transport;
use crate::error::TransportError;
use crate::key::EntityKey;

/// Transport that reads `GET {base_url}/{kind}/{id}` as a JSON object.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid source URL '{}': {}", base_url, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!("Source URL '{}' cannot be used as a base", base_url));
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  /// Build the endpoint URL for an entity, percent-encoding the segments.
  fn entity_url(&self, key: &EntityKey) -> Result<Url, TransportError> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| TransportError::new(format!("'{}' cannot be a base URL", self.base_url)))?
      .pop_if_empty()
      .push(key.kind())
      .push(key.id());
    Ok(url)
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn fetch(&self, key: &EntityKey) -> Result<Value, TransportError> {
    let url = self.entity_url(key)?;
    debug!(%url, "GET");

    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| TransportError::new(format!("Request to {} failed: {}", url, e)))?
      .error_for_status()
      .map_err(|e| TransportError::new(format!("Request to {} failed: {}", url, e)))?;

    let body = response
      .bytes()
      .await
      .map_err(|e| TransportError::new(format!("Failed to read body from {}: {}", url, e)))?;

    serde_json::from_slice(&body)
      .map_err(|e| TransportError::new(format!("Invalid JSON from {}: {}", url, e)))
  }
}
