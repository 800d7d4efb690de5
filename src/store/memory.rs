//! In-memory keyspace
//!
//! A single `RwLock` guards the whole keyspace, so an edge batch applied under
//! one write guard is never half-visible to a reader.

use super::{AdjacencyStore, KeyShape, Keyspace, StoreError, StoreResult};
use crate::graph::NodeName;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Value held by a key
#[derive(Debug, Clone)]
enum Value {
    /// Adjacency entry: neighbour name -> ignored payload
    Hash(FxHashMap<NodeName, Bytes>),
    String(Bytes),
}

/// Process-local keyspace
#[derive(Debug, Default)]
pub struct MemoryStore {
    keys: RwLock<FxHashMap<NodeName, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys of any shape
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, FxHashMap<NodeName, Value>>> {
        self.keys
            .read()
            .map_err(|_| StoreError::Unavailable("keyspace lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, FxHashMap<NodeName, Value>>> {
        self.keys
            .write()
            .map_err(|_| StoreError::Unavailable("keyspace lock poisoned".to_string()))
    }
}

impl AdjacencyStore for MemoryStore {
    fn adjacency(&self, node: &NodeName) -> StoreResult<Vec<NodeName>> {
        let keys = self.read()?;
        match keys.get(node) {
            None => Ok(Vec::new()),
            Some(Value::Hash(fields)) => Ok(fields.keys().cloned().collect()),
            Some(Value::String(_)) => Err(StoreError::WrongType),
        }
    }

    fn key_shape(&self, node: &NodeName) -> StoreResult<KeyShape> {
        let keys = self.read()?;
        Ok(match keys.get(node) {
            None => KeyShape::Absent,
            Some(Value::Hash(_)) => KeyShape::Hash,
            Some(Value::String(_)) => KeyShape::Other,
        })
    }

    fn put_edge_fields(&self, fields: &[(NodeName, NodeName)]) -> StoreResult<()> {
        let mut keys = self.write()?;

        // Validate the whole batch before touching anything
        if fields
            .iter()
            .any(|(node, _)| matches!(keys.get(node), Some(Value::String(_))))
        {
            return Err(StoreError::WrongType);
        }

        for (node, neighbor) in fields {
            let entry = keys
                .entry(node.clone())
                .or_insert_with(|| Value::Hash(FxHashMap::default()));
            if let Value::Hash(hash) = entry {
                hash.insert(neighbor.clone(), Bytes::new());
            }
        }

        debug!("Applied {} edge fields", fields.len());
        Ok(())
    }
}

impl Keyspace for MemoryStore {
    fn set_string(&self, key: &NodeName, value: Bytes) -> StoreResult<()> {
        self.write()?.insert(key.clone(), Value::String(value));
        Ok(())
    }

    fn get_string(&self, key: &NodeName) -> StoreResult<Option<Bytes>> {
        match self.read()?.get(key) {
            None => Ok(None),
            Some(Value::String(v)) => Ok(Some(v.clone())),
            Some(Value::Hash(_)) => Err(StoreError::WrongType),
        }
    }

    fn delete(&self, key: &NodeName) -> StoreResult<bool> {
        Ok(self.write()?.remove(key).is_some())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
