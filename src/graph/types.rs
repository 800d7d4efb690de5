//! Core type definitions for the graph engine

use bytes::Bytes;
use std::fmt;

/// Out-degree of a node: the number of fields in its adjacency entry
pub type Degree = usize;

/// Name of a node
///
/// Node names are opaque, binary-safe byte strings. A node exists as soon as
/// its name is used as a key or as a field of another node's adjacency entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeName(Bytes);

impl NodeName {
    pub fn new(name: impl Into<Bytes>) -> Self {
        NodeName(name.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Shared handle to the underlying bytes
    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        NodeName(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for NodeName {
    fn from(s: String) -> Self {
        NodeName(Bytes::from(s))
    }
}

impl From<&[u8]> for NodeName {
    fn from(b: &[u8]) -> Self {
        NodeName(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for NodeName {
    fn from(b: Vec<u8>) -> Self {
        NodeName(Bytes::from(b))
    }
}

impl AsRef<[u8]> for NodeName {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
