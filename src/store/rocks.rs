//! RocksDB keyspace
//!
//! Layout, one column family per value shape:
//! - `hashes`: key = u32 big-endian node length ‖ node ‖ field, value = empty
//! - `strings`: key = node, value = string payload
//!
//! The length prefix keeps `("a", "bc")` and `("ab", "c")` apart and makes the
//! fields of one node a contiguous key range.

use super::{AdjacencyStore, KeyShape, Keyspace, StoreError, StoreResult};
use crate::graph::NodeName;
use bytes::Bytes;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const CF_HASHES: &str = "hashes";
const CF_STRINGS: &str = "strings";

/// RocksDB-based persistent keyspace
pub struct RocksStore {
    db: DB,
    /// Serialises shape checks with the writes that depend on them
    write_lock: Mutex<()>,
    path: PathBuf,
}

impl RocksStore {
    /// Open or create a keyspace at `path`
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Opening RocksDB keyspace at: {}", path.display());

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(3);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_wal_recovery_mode(rocksdb::DBRecoveryMode::PointInTime);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new(CF_HASHES, Self::cf_options()),
            ColumnFamilyDescriptor::new(CF_STRINGS, Self::cf_options()),
        ];

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;
        info!("RocksDB keyspace opened");

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush_cf(self.cf(CF_HASHES)?)?;
        self.db.flush_cf(self.cf(CF_STRINGS)?)?;
        debug!("Flushed keyspace to disk");
        Ok(())
    }

    fn cf_options() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf(&self, name: &str) -> StoreResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Unavailable(format!("missing column family '{}'", name)))
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        // The guarded value is (), so a poisoned lock carries no broken state
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn hash_prefix(node: &NodeName) -> Vec<u8> {
        let bytes = node.as_bytes();
        let mut key = Vec::with_capacity(4 + bytes.len());
        key.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        key.extend_from_slice(bytes);
        key
    }

    fn field_key(node: &NodeName, field: &NodeName) -> Vec<u8> {
        let mut key = Self::hash_prefix(node);
        key.extend_from_slice(field.as_bytes());
        key
    }

    /// Raw keys of every field stored under `node`, in key order
    fn field_keys(&self, node: &NodeName, limit: Option<usize>) -> StoreResult<Vec<Box<[u8]>>> {
        let cf = self.cf(CF_HASHES)?;
        let prefix = Self::hash_prefix(node);
        let mut keys = Vec::new();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_slice(), Direction::Forward));
        for item in iter {
            let (key, _value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            keys.push(key);
            if limit.is_some_and(|n| keys.len() >= n) {
                break;
            }
        }

        Ok(keys)
    }

    fn is_string(&self, node: &NodeName) -> StoreResult<bool> {
        let cf = self.cf(CF_STRINGS)?;
        Ok(self.db.get_pinned_cf(cf, node.as_bytes())?.is_some())
    }

    /// Queue deletion of every field stored under `node`
    fn delete_fields(&self, batch: &mut WriteBatch, node: &NodeName) -> StoreResult<usize> {
        let cf = self.cf(CF_HASHES)?;
        let keys = self.field_keys(node, None)?;
        for key in &keys {
            batch.delete_cf(cf, key);
        }
        Ok(keys.len())
    }
}

impl AdjacencyStore for RocksStore {
    fn adjacency(&self, node: &NodeName) -> StoreResult<Vec<NodeName>> {
        if self.is_string(node)? {
            return Err(StoreError::WrongType);
        }

        let prefix_len = 4 + node.as_bytes().len();
        let neighbors = self
            .field_keys(node, None)?
            .into_iter()
            .map(|key| NodeName::from(&key[prefix_len..]))
            .collect();

        Ok(neighbors)
    }

    fn key_shape(&self, node: &NodeName) -> StoreResult<KeyShape> {
        if self.is_string(node)? {
            return Ok(KeyShape::Other);
        }
        if self.field_keys(node, Some(1))?.is_empty() {
            Ok(KeyShape::Absent)
        } else {
            Ok(KeyShape::Hash)
        }
    }

    fn put_edge_fields(&self, fields: &[(NodeName, NodeName)]) -> StoreResult<()> {
        let _guard = self.lock_writes();

        for (node, _) in fields {
            if self.is_string(node)? {
                return Err(StoreError::WrongType);
            }
        }

        let cf = self.cf(CF_HASHES)?;
        let mut batch = WriteBatch::default();
        for (node, neighbor) in fields {
            batch.put_cf(cf, Self::field_key(node, neighbor), b"");
        }
        self.db.write(batch)?;

        debug!("Applied {} edge fields", fields.len());
        Ok(())
    }
}

impl Keyspace for RocksStore {
    fn set_string(&self, key: &NodeName, value: Bytes) -> StoreResult<()> {
        let _guard = self.lock_writes();

        let mut batch = WriteBatch::default();
        self.delete_fields(&mut batch, key)?;
        batch.put_cf(self.cf(CF_STRINGS)?, key.as_bytes(), &value);
        self.db.write(batch)?;
        Ok(())
    }

    fn get_string(&self, key: &NodeName) -> StoreResult<Option<Bytes>> {
        let cf = self.cf(CF_STRINGS)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(value) => Ok(Some(Bytes::from(value))),
            None if self.field_keys(key, Some(1))?.is_empty() => Ok(None),
            None => Err(StoreError::WrongType),
        }
    }

    fn delete(&self, key: &NodeName) -> StoreResult<bool> {
        let _guard = self.lock_writes();

        let was_string = self.is_string(key)?;
        let mut batch = WriteBatch::default();
        let removed_fields = self.delete_fields(&mut batch, key)?;
        batch.delete_cf(self.cf(CF_STRINGS)?, key.as_bytes());
        self.db.write(batch)?;

        Ok(was_string || removed_fields > 0)
    }

    fn backend_name(&self) -> &'static str {
        "rocksdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn name(s: &str) -> NodeName {
        NodeName::from(s)
    }

    #[test]
    fn test_store_open() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.path(), temp_dir.path());
        assert_eq!(store.backend_name(), "rocksdb");
    }

    #[test]
    fn test_put_and_read_adjacency() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();

        store
            .put_edge_fields(&[(name("a"), name("b")), (name("a"), name("c"))])
            .unwrap();

        let mut neighbors = store.adjacency(&name("a")).unwrap();
        neighbors.sort();
        assert_eq!(neighbors, vec![name("b"), name("c")]);
        assert_eq!(store.key_shape(&name("a")).unwrap(), KeyShape::Hash);
        assert_eq!(store.key_shape(&name("b")).unwrap(), KeyShape::Absent);
    }

    #[test]
    fn test_prefix_does_not_leak_between_nodes() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();

        store.put_edge_fields(&[(name("a"), name("bc"))]).unwrap();
        store.put_edge_fields(&[(name("ab"), name("c"))]).unwrap();

        assert_eq!(store.adjacency(&name("a")).unwrap(), vec![name("bc")]);
        assert_eq!(store.adjacency(&name("ab")).unwrap(), vec![name("c")]);
    }

    #[test]
    fn test_wrong_type_batch_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();

        store.set_string(&name("b"), Bytes::from_static(b"x")).unwrap();
        let result = store.put_edge_fields(&[(name("a"), name("b")), (name("b"), name("a"))]);

        assert!(matches!(result, Err(StoreError::WrongType)));
        assert_eq!(store.key_shape(&name("a")).unwrap(), KeyShape::Absent);
        assert!(matches!(store.adjacency(&name("b")), Err(StoreError::WrongType)));
    }

    #[test]
    fn test_set_string_replaces_hash() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();

        store.put_edge_fields(&[(name("a"), name("b"))]).unwrap();
        assert!(matches!(store.get_string(&name("a")), Err(StoreError::WrongType)));

        store.set_string(&name("a"), Bytes::from_static(b"v")).unwrap();
        assert_eq!(store.key_shape(&name("a")).unwrap(), KeyShape::Other);
        assert_eq!(store.get_string(&name("a")).unwrap(), Some(Bytes::from_static(b"v")));

        assert!(store.delete(&name("a")).unwrap());
        assert!(!store.delete(&name("a")).unwrap());
        assert_eq!(store.key_shape(&name("a")).unwrap(), KeyShape::Absent);
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(temp_dir.path()).unwrap();
            store
                .put_edge_fields(&[(name("x"), name("y")), (name("y"), name("x"))])
                .unwrap();
            store.flush().unwrap();
        }

        let store = RocksStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.adjacency(&name("x")).unwrap(), vec![name("y")]);
        assert_eq!(store.adjacency(&name("y")).unwrap(), vec![name("x")]);
    }
}
