//! Edge insertion
//!
//! An edge between `a` and `b` is stored as a symmetric pair of directed
//! entries: field `b` in `a`'s adjacency hash and field `a` in `b`'s. Both
//! fields are written in one store batch while the stripes of both keys are
//! held, so no reader ever observes one direction without the other.

use super::locks::KeyLocks;
use super::types::NodeName;
use super::{GraphError, GraphResult};
use crate::store::{AdjacencyStore, StoreError};
use tracing::debug;

pub struct EdgeWriter<'a, S: AdjacencyStore + ?Sized> {
    store: &'a S,
    locks: &'a KeyLocks,
}

impl<'a, S: AdjacencyStore + ?Sized> EdgeWriter<'a, S> {
    pub fn new(store: &'a S, locks: &'a KeyLocks) -> Self {
        Self { store, locks }
    }

    /// Connect `a` and `b`. Re-adding an existing edge changes nothing.
    ///
    /// Fails with [`GraphError::WrongType`] and writes nothing when either
    /// key already holds a non-hash value.
    pub fn add_edge(&self, a: &NodeName, b: &NodeName) -> GraphResult<()> {
        let _guard = self.locks.lock(&[a, b]);

        for key in [a, b] {
            if !self.store.key_shape(key)?.accepts_adjacency() {
                return Err(GraphError::WrongType { key: key.clone() });
            }
        }

        let fields = [(a.clone(), b.clone()), (b.clone(), a.clone())];
        // A self-loop is a single field
        let fields = if a == b { &fields[..1] } else { &fields[..] };

        self.store.put_edge_fields(fields).map_err(|e| match e {
            // Lost a race with a writer outside our locks
            StoreError::WrongType => GraphError::WrongType { key: a.clone() },
            other => other.into(),
        })?;

        debug!("Added edge {} <-> {}", a, b);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyShape, Keyspace, MemoryStore};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::thread;

    fn name(s: &str) -> NodeName {
        NodeName::from(s)
    }

    #[test]
    fn test_add_edge_is_symmetric() {
        let store = MemoryStore::new();
        let locks = KeyLocks::default();
        EdgeWriter::new(&store, &locks).add_edge(&name("a"), &name("b")).unwrap();

        assert_eq!(store.adjacency(&name("a")).unwrap(), vec![name("b")]);
        assert_eq!(store.adjacency(&name("b")).unwrap(), vec![name("a")]);
    }

    #[test]
    fn test_add_edge_is_idempotent() {
        let store = MemoryStore::new();
        let locks = KeyLocks::default();
        let writer = EdgeWriter::new(&store, &locks);

        writer.add_edge(&name("a"), &name("b")).unwrap();
        writer.add_edge(&name("a"), &name("b")).unwrap();
        writer.add_edge(&name("b"), &name("a")).unwrap();

        assert_eq!(store.adjacency(&name("a")).unwrap(), vec![name("b")]);
        assert_eq!(store.adjacency(&name("b")).unwrap(), vec![name("a")]);
    }

    #[test]
    fn test_self_loop_edge() {
        let store = MemoryStore::new();
        let locks = KeyLocks::default();
        EdgeWriter::new(&store, &locks).add_edge(&name("a"), &name("a")).unwrap();
        assert_eq!(store.adjacency(&name("a")).unwrap(), vec![name("a")]);
    }

    #[test]
    fn test_wrong_type_leaves_both_keys_untouched() {
        let store = MemoryStore::new();
        let locks = KeyLocks::default();
        store.set_string(&name("a"), Bytes::from_static(b"plain")).unwrap();

        let result = EdgeWriter::new(&store, &locks).add_edge(&name("a"), &name("b"));
        match result {
            Err(GraphError::WrongType { key }) => assert_eq!(key, name("a")),
            other => panic!("expected WrongType, got {:?}", other),
        }

        assert_eq!(
            store.get_string(&name("a")).unwrap(),
            Some(Bytes::from_static(b"plain"))
        );
        assert_eq!(store.key_shape(&name("b")).unwrap(), KeyShape::Absent);
    }

    #[test]
    fn test_wrong_type_on_second_key() {
        let store = MemoryStore::new();
        let locks = KeyLocks::default();
        store.set_string(&name("b"), Bytes::from_static(b"plain")).unwrap();

        let result = EdgeWriter::new(&store, &locks).add_edge(&name("a"), &name("b"));
        assert!(matches!(result, Err(GraphError::WrongType { .. })));
        assert_eq!(store.key_shape(&name("a")).unwrap(), KeyShape::Absent);
    }

    #[test]
    fn test_readers_never_see_half_an_edge() {
        let store = Arc::new(MemoryStore::new());
        let locks = Arc::new(KeyLocks::default());

        let writer = {
            let store = Arc::clone(&store);
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let writer = EdgeWriter::new(&*store, &*locks);
                for i in 0..500 {
                    writer
                        .add_edge(&name(&format!("n{}", i)), &name(&format!("n{}", i + 1)))
                        .unwrap();
                }
            })
        };

        for _ in 0..2_000 {
            for i in 0..20 {
                let node = name(&format!("n{}", i));
                for neighbor in store.adjacency(&node).unwrap() {
                    assert!(store.adjacency(&neighbor).unwrap().contains(&node));
                }
            }
        }

        writer.join().unwrap();
    }
}
