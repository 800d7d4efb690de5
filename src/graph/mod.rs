//! Graph engine over an external adjacency store
//!
//! This module implements the two graph operations:
//! - edge insertion as a symmetric pair of directed adjacency fields ([`EdgeWriter`])
//! - depth-first reachability with per-node out-degree ([`TraversalEngine`])
//!
//! Neither keeps graph state between calls. The store passed in is the only
//! source and sink of edge data.

pub mod edge;
pub mod locks;
pub mod traversal;
pub mod types;
pub mod visited;

// Re-export main types
pub use edge::EdgeWriter;
pub use locks::{KeyGuard, KeyLocks};
pub use traversal::TraversalEngine;
pub use types::{Degree, NodeName};
pub use visited::VisitedSet;

use crate::store::StoreError;
use thiserror::Error;

/// Errors that can occur during graph operations
#[derive(Error, Debug)]
pub enum GraphError {
    /// A node key holds a value that is not an adjacency entry
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType { key: NodeName },

    /// The store failed; the operation had no effect
    #[error("{0}")]
    Store(#[from] StoreError),
}

pub type GraphResult<T> = Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = GraphError::WrongType {
            key: NodeName::from("a"),
        };
        assert!(err.to_string().starts_with("WRONGTYPE"));

        let err: GraphError = StoreError::Timeout.into();
        assert_eq!(err.to_string(), "store call timed out");
    }
}
