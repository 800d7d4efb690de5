//! Graphz
//!
//! Directed-graph storage and depth-first traversal on top of a key-value
//! hash store, served over the Redis protocol.
//!
//! # Storage representation
//!
//! Each node name is a key holding a hash. The fields of that hash are the
//! names of the node's outbound neighbours and their values are empty. Adding
//! an edge between `a` and `b` writes field `b` under `a` and field `a` under
//! `b` as one atomic unit.
//!
//! # Commands
//!
//! - `GRAPHZ.ADDEDGE n1 n2`: connect two nodes, replies `OK`
//! - `GRAPHZ.DFS n`: every node reachable from `n` with its out-degree,
//!   replied as a flat `[node, degree, ...]` array
//!
//! ## Example Usage
//!
//! ```rust
//! use graphz::graph::{EdgeWriter, KeyLocks, NodeName, TraversalEngine};
//! use graphz::store::MemoryStore;
//!
//! let store = MemoryStore::new();
//! let locks = KeyLocks::default();
//!
//! let writer = EdgeWriter::new(&store, &locks);
//! writer.add_edge(&NodeName::from("alice"), &NodeName::from("bob")).unwrap();
//! writer.add_edge(&NodeName::from("bob"), &NodeName::from("carol")).unwrap();
//!
//! let visited = TraversalEngine::new(&store).run(&NodeName::from("alice")).unwrap();
//! assert_eq!(visited.len(), 3);
//! assert_eq!(visited.degree(&NodeName::from("bob")), Some(2));
//! ```

#![warn(clippy::all)]

pub mod graph;
pub mod protocol;
pub mod store;

// Re-export main types for convenience
pub use graph::{
    Degree, EdgeWriter, GraphError, GraphResult, KeyLocks, NodeName, TraversalEngine, VisitedSet,
};

pub use protocol::{CommandHandler, RespServer, RespValue, ServerConfig, StoreBackend};

pub use store::{
    AdjacencyStore, KeyShape, Keyspace, MemoryStore, RedisStore, RocksStore, StoreError,
    StoreResult,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
