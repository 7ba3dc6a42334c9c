use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use relay_server::ServerConfig;
use relay_store::{BlobStore, FsBlobStore, MemoryBlobStore, DEFAULT_LIST_PAGE_SIZE};
use relay_telemetry::{LogFormat, TelemetryConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// In-process, lost on restart.
    Memory,
    /// One directory per container under `--store-root`.
    Fs,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Blob storage relay over WebSocket", long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 80)]
    port: u16,

    /// Blob store backend
    #[arg(long, env = "BLOB_RELAY_STORE", value_enum, default_value_t = StoreKind::Memory)]
    store: StoreKind,

    /// Root directory for the `fs` store
    #[arg(long, env = "BLOB_RELAY_STORE_ROOT", default_value = "./blob-data")]
    store_root: PathBuf,

    /// Most blobs returned per listing segment
    #[arg(long, env = "BLOB_RELAY_LIST_PAGE_SIZE", default_value_t = DEFAULT_LIST_PAGE_SIZE)]
    list_page_size: usize,

    /// Outgoing frames queued per connection before new ones are dropped
    #[arg(long, env = "BLOB_RELAY_MAX_SEND_QUEUE", default_value_t = 256)]
    max_send_queue: usize,

    /// Seconds between pings
    #[arg(long, env = "BLOB_RELAY_HEARTBEAT_SECS", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    heartbeat_secs: u64,

    /// Seconds without a pong before a connection is dropped
    #[arg(long, env = "BLOB_RELAY_CLIENT_TIMEOUT_SECS", default_value_t = 90, value_parser = clap::value_parser!(u64).range(1..))]
    client_timeout_secs: u64,

    /// Seconds between dead-connection sweeps
    #[arg(long, env = "BLOB_RELAY_CLEANUP_SECS", default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    cleanup_secs: u64,

    /// Default log level (RUST_LOG overrides)
    #[arg(long, env = "BLOB_RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit JSON log lines
    #[arg(long, env = "BLOB_RELAY_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn telemetry_config(&self) -> Result<TelemetryConfig> {
        Ok(TelemetryConfig {
            log_level: relay_telemetry::parse_level(&self.log_level)?,
            format: if self.log_json {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
            ..Default::default()
        })
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            max_send_queue: self.max_send_queue,
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            client_timeout: Duration::from_secs(self.client_timeout_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_secs),
        }
    }

    async fn open_store(&self) -> Result<Arc<dyn BlobStore>> {
        let store: Arc<dyn BlobStore> = match self.store {
            StoreKind::Memory => {
                Arc::new(MemoryBlobStore::with_page_size(self.list_page_size))
            }
            StoreKind::Fs => {
                let store = FsBlobStore::open(&self.store_root)
                    .await
                    .with_context(|| {
                        format!("failed to open store at {}", self.store_root.display())
                    })?;
                Arc::new(store.with_page_size(self.list_page_size))
            }
        };
        Ok(store)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    relay_telemetry::init_telemetry(&args.telemetry_config()?)?;
    tracing::info!(store = ?args.store, "Starting blob relay");

    let store = args.open_store().await?;
    if args.store == StoreKind::Fs {
        tracing::info!(root = %args.store_root.display(), "Directory store opened");
    }

    let handle = relay_server::start(args.server_config(), store)
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;
    tracing::info!(port = handle.port, "Blob relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}
