//! Adjacency storage backends
//!
//! The graph engine never keeps the graph in local memory. Every adjacency
//! entry lives in a key-value hash store reached through [`AdjacencyStore`]:
//! - each node name is a key
//! - the fields of that key's hash are the node's outbound neighbours
//! - field values are empty and carry no meaning
//!
//! Three backends are provided:
//! - [`MemoryStore`]: process-local keyspace, used for tests and ephemeral servers
//! - [`RocksStore`]: RocksDB-backed keyspace that survives restarts
//! - [`RedisStore`]: an external Redis-compatible server spoken to over RESP

pub mod memory;
pub mod redis;
pub mod rocks;

pub use memory::MemoryStore;
pub use redis::RedisStore;
pub use rocks::RocksStore;

use crate::graph::NodeName;
use bytes::Bytes;
use std::io;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// The key exists but does not hold a hash
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// A store call did not complete within the configured timeout
    #[error("store call timed out")]
    Timeout,

    /// The store could not serve the request
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// I/O error talking to the store
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// RocksDB error
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// The store replied with something we could not interpret
    #[error("malformed store reply: {0}")]
    Protocol(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Shape of the value currently stored under a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    /// Nothing is stored under the key
    Absent,
    /// The key holds a hash, i.e. an adjacency entry
    Hash,
    /// The key holds some other kind of value
    Other,
}

impl KeyShape {
    /// Whether an adjacency entry may be read from or written to this key
    pub fn accepts_adjacency(self) -> bool {
        matches!(self, KeyShape::Absent | KeyShape::Hash)
    }

    /// Redis `TYPE` spelling of the shape
    pub fn type_name(self) -> &'static str {
        match self {
            KeyShape::Absent => "none",
            KeyShape::Hash => "hash",
            KeyShape::Other => "string",
        }
    }
}

/// The adjacency contract the graph engine consumes.
///
/// Implementations must be safe to share between threads. A batch passed to
/// [`put_edge_fields`](AdjacencyStore::put_edge_fields) is applied as one unit:
/// readers of the same store observe either none or all of its fields.
pub trait AdjacencyStore: Send + Sync {
    /// Names of every outbound neighbour of `node`.
    ///
    /// Returns an empty list when the key is absent and
    /// [`StoreError::WrongType`] when it holds a non-hash value.
    fn adjacency(&self, node: &NodeName) -> StoreResult<Vec<NodeName>>;

    /// Shape of the value stored under `node`.
    fn key_shape(&self, node: &NodeName) -> StoreResult<KeyShape>;

    /// Upsert each `(node, neighbour)` field with an empty payload.
    ///
    /// Fails with [`StoreError::WrongType`] without writing anything if any
    /// target key holds a non-hash value.
    fn put_edge_fields(&self, fields: &[(NodeName, NodeName)]) -> StoreResult<()>;
}

/// Plain key-value operations layered over an adjacency store.
///
/// These let callers place non-hash values in the keyspace, which is what
/// makes the shape preconditions of the graph operations observable.
pub trait Keyspace: AdjacencyStore {
    /// Store a string value, replacing whatever the key held before
    fn set_string(&self, key: &NodeName, value: Bytes) -> StoreResult<()>;

    /// Fetch a string value; `WrongType` if the key holds a hash
    fn get_string(&self, key: &NodeName) -> StoreResult<Option<Bytes>>;

    /// Remove a key of any shape, returning whether it existed
    fn delete(&self, key: &NodeName) -> StoreResult<bool>;

    /// Short backend name reported by `INFO`
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shape_acceptance() {
        assert!(KeyShape::Absent.accepts_adjacency());
        assert!(KeyShape::Hash.accepts_adjacency());
        assert!(!KeyShape::Other.accepts_adjacency());
    }

    #[test]
    fn test_key_shape_type_names() {
        assert_eq!(KeyShape::Absent.type_name(), "none");
        assert_eq!(KeyShape::Hash.type_name(), "hash");
        assert_eq!(KeyShape::Other.type_name(), "string");
    }
}
