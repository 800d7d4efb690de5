//! Network protocol module
//!
//! Implements RESP (Redis Serialization Protocol) support:
//! - the RESP wire codec, shared by the server and the Redis store client
//! - the `GRAPHZ.*` command surface plus a handful of keyspace commands
//! - a tokio TCP server with pipelining and a connection cap

pub mod command;
pub mod resp;
pub mod server;

// Re-export main types
pub use command::CommandHandler;
pub use resp::{RespDecoder, RespError, RespResult, RespValue};
pub use server::{ConfigError, RespServer, ServerConfig, StoreBackend};
