use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{NoopStore, RecordStore, SqliteStore};
use crate::view::{ViewMode, ViewOptions};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub source: SourceConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Start in offline mode
  #[serde(default)]
  pub offline: bool,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
  /// Base URL; entities are read from `{base_url}/{kind}/{id}`
  pub base_url: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for SourceConfig {
  fn default() -> Self {
    Self {
      base_url: None,
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Persist snapshots; when false nothing is written and offline reads miss
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Database path (default: $XDG_DATA_HOME/cachedview/cache.db)
  pub path: Option<PathBuf>,
  /// Re-fetch resolved values older than this many seconds
  pub stale_after_secs: Option<u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      stale_after_secs: None,
    }
  }
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Filter directives, overridden by RUST_LOG
  pub filter: Option<String>,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cachedview.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cachedview/config.yaml
  ///
  /// Without any file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cachedview.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cachedview").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file is a valid, all-defaults config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  pub fn base_url(&self) -> Result<&str> {
    self.source.base_url.as_deref().ok_or_else(|| {
      eyre!("No source URL configured. Set source.base_url in the config file or pass --base-url.")
    })
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.source.timeout_secs)
  }

  pub fn view_options(&self) -> ViewOptions {
    ViewOptions {
      mode: if self.offline {
        ViewMode::Offline
      } else {
        ViewMode::Online
      },
      stale_after: self
        .cache
        .stale_after_secs
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(chrono::Duration::try_seconds),
    }
  }

  /// Open the configured record store.
  pub fn open_store(&self) -> Result<Arc<dyn RecordStore>> {
    if !self.cache.enabled {
      return Ok(Arc::new(NoopStore));
    }

    let store = match &self.cache.path {
      Some(path) => SqliteStore::open_at(path),
      None => SqliteStore::open(),
    }
    .map_err(|e| eyre!("{}", e))?;

    Ok(Arc::new(store))
  }
}
