//! RESP protocol server implementation

use crate::graph::KeyLocks;
use crate::protocol::command::CommandHandler;
use crate::protocol::resp::{RespDecoder, RespValue};
use crate::store::{Keyspace, MemoryStore, RedisStore, RocksStore, StoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Where adjacency entries live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local keyspace, lost on exit
    Memory,
    /// RocksDB keyspace at `path`
    Rocksdb { path: String },
    /// External Redis-compatible server at `address` (`host:port`)
    Redis { address: String },
}

impl StoreBackend {
    /// Open the configured keyspace
    pub fn open(&self, timeout: Duration) -> StoreResult<Arc<dyn Keyspace>> {
        let store: Arc<dyn Keyspace> = match self {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Rocksdb { path } => Arc::new(RocksStore::open(path)?),
            StoreBackend::Redis { address } => Arc::new(RedisStore::new(address.clone(), timeout)),
        };
        info!("Using {} store backend", store.backend_name());
        Ok(store)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub address: String,
    /// Port
    pub port: u16,
    /// Maximum connections
    pub max_connections: usize,
    /// Adjacency store backend
    pub backend: StoreBackend,
    /// Upper bound on a single store call, in milliseconds
    pub store_timeout_ms: u64,
    /// Number of key lock stripes
    pub lock_stripes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 6379,
            max_connections: 10000,
            backend: StoreBackend::Memory,
            store_timeout_ms: 5000,
            lock_stripes: crate::graph::locks::DEFAULT_STRIPES,
        }
    }
}

impl ServerConfig {
    /// Load a configuration from a YAML file; missing fields take their defaults
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// RESP protocol server
pub struct RespServer {
    /// Server configuration
    config: ServerConfig,
    /// Command handler
    handler: Arc<CommandHandler>,
    /// Permits for open connections
    connections: Arc<Semaphore>,
}

impl RespServer {
    /// Create a new RESP server over `store`
    pub fn new(config: ServerConfig, store: Arc<dyn Keyspace>) -> Self {
        let locks = Arc::new(KeyLocks::new(config.lock_stripes));
        let handler = Arc::new(CommandHandler::new(store, locks));
        let connections = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config,
            handler,
            connections,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let addr = self.config.bind_address();
        let listener = TcpListener::bind(&addr).await?;
        info!("RESP server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Start the server
    pub async fn start(&self) -> std::io::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until an accept error occurs
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (mut socket, peer_addr) = listener.accept().await?;

            let permit = match Arc::clone(&self.connections).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Refusing connection from {}: connection limit reached", peer_addr);
                    let reply = RespValue::error("ERR max number of clients reached").to_bytes()?;
                    // Best effort, the socket is dropped either way
                    let _ = socket.write_all(&reply).await;
                    continue;
                }
            };
            debug!("New connection from {}", peer_addr);

            let handler = Arc::clone(&self.handler);

            // Spawn a new task for each connection
            tokio::spawn(async move {
                if let Err(e) = handle_connection(socket, handler).await {
                    error!("Error handling connection from {}: {}", peer_addr, e);
                }
                drop(permit);
            });
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    mut socket: TcpStream,
    handler: Arc<CommandHandler>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut decoder = RespDecoder::new();

    loop {
        // Read data from socket
        let n = socket.read_buf(decoder.buffer_mut()).await?;

        if n == 0 {
            // Connection closed
            debug!("Connection closed by client");
            return Ok(());
        }

        // Answer every complete command in the buffer, in order
        let mut response_buf = Vec::new();
        loop {
            match decoder.next_value() {
                Ok(Some(value)) => {
                    let response = handler.handle_command(&value).await;
                    response.encode(&mut response_buf)?;
                }
                Ok(None) => {
                    // Need more data
                    break;
                }
                Err(e) => {
                    // The stream cannot be resynchronised after a framing error
                    error!("Protocol error: {}", e);
                    RespValue::error(format!("ERR Protocol error: {}", e))
                        .encode(&mut response_buf)?;
                    socket.write_all(&response_buf).await?;
                    return Ok(());
                }
            }
        }

        if !response_buf.is_empty() {
            socket.write_all(&response_buf).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.port, 6379);
        assert_eq!(config.max_connections, 10000);
        assert_eq!(config.backend, StoreBackend::Memory);
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_from_yaml() {
        let config = ServerConfig::from_yaml_str(
            "port: 6380\nbackend:\n  type: rocksdb\n  path: /tmp/graphz\nstore_timeout_ms: 250\n",
        )
        .unwrap();

        assert_eq!(config.port, 6380);
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(
            config.backend,
            StoreBackend::Rocksdb {
                path: "/tmp/graphz".to_string()
            }
        );
        assert_eq!(config.store_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_config_redis_backend() {
        let yaml = "backend:\n  type: redis\n  address: 10.0.0.5:6379\n";
        let config = ServerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.backend,
            StoreBackend::Redis {
                address: "10.0.0.5:6379".to_string()
            }
        );
    }

    #[test]
    fn test_config_rejects_unknown_backend() {
        assert!(ServerConfig::from_yaml_str("backend:\n  type: floppy\n").is_err());
    }

    #[test]
    fn test_server_creation() {
        let config = ServerConfig::default();
        let server = RespServer::new(config, Arc::new(MemoryStore::new()));
        assert_eq!(server.config().bind_address(), "127.0.0.1:6379");
    }

    #[tokio::test]
    async fn test_connection_handling() {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let server = RespServer::new(config, Arc::new(MemoryStore::new()));
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.serve(listener).await });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

        let mut reply = [0u8; 7];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"+PONG\r\n");
    }
}
