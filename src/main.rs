use anyhow::Context;
use clap::{Parser, ValueEnum};
use graphz::{RespServer, ServerConfig, StoreBackend};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Graphz server: graph storage and traversal over RESP
#[derive(Parser, Debug)]
#[command(name = "graphz-server", version, about, long_about = None)]
struct Args {
    /// YAML configuration file; flags below override its values
    #[arg(short, long, env = "GRAPHZ_CONFIG")]
    config: Option<PathBuf>,

    /// Host address to bind to
    #[arg(long, env = "GRAPHZ_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "GRAPHZ_PORT")]
    port: Option<u16>,

    /// Adjacency store backend
    #[arg(long, value_enum, env = "GRAPHZ_BACKEND")]
    backend: Option<Backend>,

    /// Data directory for the rocksdb backend
    #[arg(long, default_value = "./graphz_data", env = "GRAPHZ_DATA_DIR")]
    data_dir: String,

    /// Address of the Redis server for the redis backend
    #[arg(long, default_value = "127.0.0.1:6379", env = "GRAPHZ_REDIS_ADDR")]
    redis_addr: String,

    /// Timeout for a single store call, in milliseconds
    #[arg(long, env = "GRAPHZ_STORE_TIMEOUT_MS")]
    store_timeout_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Memory,
    Rocksdb,
    Redis,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_yaml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.address = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(timeout) = self.store_timeout_ms {
            config.store_timeout_ms = timeout;
        }
        if let Some(backend) = self.backend {
            config.backend = match backend {
                Backend::Memory => StoreBackend::Memory,
                Backend::Rocksdb => StoreBackend::Rocksdb {
                    path: self.data_dir,
                },
                Backend::Redis => StoreBackend::Redis {
                    address: self.redis_addr,
                },
            };
        }

        Ok(config)
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("graphz=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Args::parse().into_config()?;
    info!("Graphz v{} starting", graphz::version());

    let store = config
        .backend
        .open(config.store_timeout())
        .context("opening store")?;
    let server = RespServer::new(config, store);

    tokio::select! {
        result = server.start() => result.context("server error")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
