use cachedview::config::Config;
use cachedview::{
  CachedView, EntityKey, HttpTransport, RecordStore, Transport, UnreachableTransport,
};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "cachedview")]
#[command(about = "Read remote entities through a persistent, offline-capable cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cachedview/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Base URL of the entity source
  #[arg(short, long)]
  base_url: Option<String>,

  /// Serve reads from the local snapshot store only
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print one attribute of an entity as JSON
  Get {
    /// Entity key, e.g. user:42
    key: EntityKey,
    attribute: String,
  },
  /// Re-fetch one attribute and print it
  Refresh { key: EntityKey, attribute: String },
  /// Print the persisted snapshot of an entity
  Snapshot { key: EntityKey },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Command line wins over the config file
  if let Some(base_url) = args.base_url {
    config.source.base_url = Some(base_url);
  }
  if args.offline {
    config.offline = true;
  }

  let _log_guard = cachedview::logging::init(&config.log)?;

  let store = config.open_store()?;

  match args.command {
    Command::Snapshot { key } => {
      let snapshot = store
        .read(&key)
        .await
        .map_err(|e| eyre!("Failed to read snapshot for {}: {}", key, e))?
        .ok_or_else(|| eyre!("No snapshot stored for {}", key))?;
      print_json(&snapshot)?;
    }
    Command::Get { key, attribute } => {
      let view = open_view(&config, store)?;
      let value = view.document(&key).attribute(&attribute).get().await?;
      print_json(&value)?;
    }
    Command::Refresh { key, attribute } => {
      let view = open_view(&config, store)?;
      let value = view.refresh(&key, &attribute).await?;
      print_json(&value)?;
    }
  }

  Ok(())
}

fn open_view(config: &Config, store: Arc<dyn RecordStore>) -> Result<CachedView> {
  // Offline reads only touch the store, so no source is needed
  let transport: Arc<dyn Transport> = match &config.source.base_url {
    None if config.offline => Arc::new(UnreachableTransport),
    _ => Arc::new(HttpTransport::new(config.base_url()?, config.timeout())?),
  };
  Ok(CachedView::with_options(
    transport,
    store,
    config.view_options(),
  ))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  let json = serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to encode JSON: {}", e))?;
  println!("{}", json);
  Ok(())
}
