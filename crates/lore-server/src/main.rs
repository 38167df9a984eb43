//! Lore server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! store and blob directory under the configured data dir, and serves the
//! tool router over HTTP.
//!
//! Every setting can also come from the environment with a `LORE_` prefix,
//! e.g. `LORE_PORT=8080` or `LORE_MODEL__API_KEY=...`.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use lore_core::schema::SchemaRegistry;
use lore_engine::{Engine, EngineConfig, ModelConfig};
use lore_store_sqlite::SqliteStore;
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Lore truth-layer server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

/// Runtime server configuration, deserialised from `config.toml`.
#[derive(Deserialize, Clone)]
struct ServerConfig {
  #[serde(default = "default_host")]
  host:              String,
  #[serde(default = "default_port")]
  port:              u16,
  /// Directory holding the database file and the blob tree.
  #[serde(default = "default_data_dir")]
  data_dir:          PathBuf,
  #[serde(default = "default_quota")]
  monthly_run_quota: u32,
  /// Optional JSON file overriding the built-in schema registry.
  schema_file:       Option<PathBuf>,
  /// Model extractor settings; absent means rules-only extraction.
  model:             Option<ModelConfig>,
}

fn default_host() -> String {
  "127.0.0.1".to_string()
}

fn default_port() -> u16 {
  7413
}

fn default_data_dir() -> PathBuf {
  PathBuf::from("~/.local/share/lore")
}

fn default_quota() -> u32 {
  500
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("LORE").separator("__"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let data_dir = expand_tilde(&server_cfg.data_dir);
  std::fs::create_dir_all(&data_dir)
    .with_context(|| format!("failed to create data dir {data_dir:?}"))?;

  let store =
    SqliteStore::open(data_dir.join("lore.db"), data_dir.join("blobs"))
      .await
      .with_context(|| format!("failed to open store in {data_dir:?}"))?;

  let registry = match &server_cfg.schema_file {
    Some(path) => {
      let path = expand_tilde(path);
      let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read schema file {path:?}"))?;
      SchemaRegistry::from_json(&json)
        .with_context(|| format!("invalid schema registry in {path:?}"))?
    }
    None => SchemaRegistry::builtin(),
  };

  if server_cfg.model.is_none() {
    tracing::info!("no model configured; unstructured sources use the rule extractor");
  }

  let engine = Engine::new(Arc::new(store), registry, EngineConfig {
    monthly_run_quota: server_cfg.monthly_run_quota,
    model:             server_cfg.model.clone(),
  });

  let app = lore_api::tool_router(Arc::new(engine))
    .layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
