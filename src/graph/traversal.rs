//! Depth-first traversal over an adjacency store
//!
//! The walk never holds the graph locally: each node's adjacency entry is
//! fetched from the store on demand, exactly once per traversal. Pending
//! nodes live on an explicit work stack, so the depth of the graph has no
//! bearing on the native call stack.

use super::types::NodeName;
use super::visited::VisitedSet;
use super::{GraphError, GraphResult};
use crate::store::{AdjacencyStore, StoreError};
use tracing::{debug, warn};

/// Depth-first traversal engine
pub struct TraversalEngine<'a, S: AdjacencyStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: AdjacencyStore + ?Sized> TraversalEngine<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Visit every node reachable from `start`, recording its out-degree.
    ///
    /// The start node need not exist: an absent key yields `{start: 0}`.
    /// A start key holding a non-hash value is rejected with
    /// [`GraphError::WrongType`]. Any store failure aborts the whole walk and
    /// no partial result is returned.
    pub fn run(&self, start: &NodeName) -> GraphResult<VisitedSet> {
        if !self.store.key_shape(start)?.accepts_adjacency() {
            return Err(GraphError::WrongType { key: start.clone() });
        }

        let mut visited = VisitedSet::new();
        let mut stack = vec![start.clone()];
        let mut fetches = 0usize;

        while let Some(node) = stack.pop() {
            // Checked before any store access so each node is fetched once
            if visited.has(&node) {
                continue;
            }

            let neighbors = match self.store.adjacency(&node) {
                Ok(neighbors) => neighbors,
                Err(StoreError::WrongType) if node != *start => {
                    // A neighbour name reused for a plain value is a leaf
                    warn!("Node {} holds a non-hash value, treating it as a leaf", node);
                    Vec::new()
                }
                Err(StoreError::WrongType) => {
                    return Err(GraphError::WrongType { key: node });
                }
                Err(e) => {
                    warn!("Traversal from {} aborted at {}: {}", start, node, e);
                    return Err(e.into());
                }
            };
            fetches += 1;

            // Marked before its neighbours are expanded, so a cycle back to
            // this node stops here
            visited.set(node, neighbors.len());

            // Reversed so the first neighbour is expanded first
            stack.extend(
                neighbors
                    .into_iter()
                    .rev()
                    .filter(|neighbor| !visited.has(neighbor)),
            );
        }

        debug!(
            "Traversal from {} visited {} nodes with {} fetches",
            start,
            visited.len(),
            fetches
        );
        Ok(visited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyShape, Keyspace, MemoryStore, StoreResult};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn name(s: &str) -> NodeName {
        NodeName::from(s)
    }

    fn directed(store: &MemoryStore, edges: &[(&str, &str)]) {
        let fields: Vec<_> = edges.iter().map(|(a, b)| (name(a), name(b))).collect();
        store.put_edge_fields(&fields).unwrap();
    }

    fn degrees(visited: VisitedSet) -> Vec<(String, usize)> {
        visited
            .into_sorted_vec()
            .into_iter()
            .map(|(n, d)| (n.to_string(), d))
            .collect()
    }

    /// Counts adjacency fetches and fails on a chosen node
    struct ProbeStore {
        inner: MemoryStore,
        fetches: AtomicUsize,
        fail_on: Option<NodeName>,
    }

    impl ProbeStore {
        fn new(inner: MemoryStore, fail_on: Option<&str>) -> Self {
            Self {
                inner,
                fetches: AtomicUsize::new(0),
                fail_on: fail_on.map(name),
            }
        }
    }

    impl AdjacencyStore for ProbeStore {
        fn adjacency(&self, node: &NodeName) -> StoreResult<Vec<NodeName>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.as_ref() == Some(node) {
                return Err(StoreError::Unavailable("injected failure".to_string()));
            }
            self.inner.adjacency(node)
        }

        fn key_shape(&self, node: &NodeName) -> StoreResult<KeyShape> {
            self.inner.key_shape(node)
        }

        fn put_edge_fields(&self, fields: &[(NodeName, NodeName)]) -> StoreResult<()> {
            self.inner.put_edge_fields(fields)
        }
    }

    #[test]
    fn test_isolated_node() {
        let store = MemoryStore::new();
        let visited = TraversalEngine::new(&store).run(&name("lonely")).unwrap();
        assert_eq!(degrees(visited), vec![("lonely".to_string(), 0)]);
    }

    #[test]
    fn test_cycle_terminates() {
        let store = MemoryStore::new();
        directed(&store, &[("a", "b"), ("b", "c"), ("c", "a")]);

        let visited = TraversalEngine::new(&store).run(&name("a")).unwrap();
        assert_eq!(
            degrees(visited),
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 1),
                ("c".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_diamond_fetches_each_node_once() {
        let memory = MemoryStore::new();
        directed(&memory, &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]);
        let store = ProbeStore::new(memory, None);

        let visited = TraversalEngine::new(&store).run(&name("a")).unwrap();
        assert_eq!(
            degrees(visited),
            vec![
                ("a".to_string(), 2),
                ("b".to_string(), 1),
                ("c".to_string(), 1),
                ("d".to_string(), 0)
            ]
        );
        assert_eq!(store.fetches.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_self_loop() {
        let store = MemoryStore::new();
        directed(&store, &[("a", "a")]);
        let visited = TraversalEngine::new(&store).run(&name("a")).unwrap();
        assert_eq!(degrees(visited), vec![("a".to_string(), 1)]);
    }

    #[test]
    fn test_only_reachable_nodes() {
        let store = MemoryStore::new();
        directed(&store, &[("a", "b"), ("x", "a")]);
        let visited = TraversalEngine::new(&store).run(&name("a")).unwrap();
        assert!(!visited.has(&name("x")));
        assert_eq!(visited.len(), 2);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let store = MemoryStore::new();
        let fields: Vec<_> = (0..200_000)
            .map(|i| (name(&format!("n{}", i)), name(&format!("n{}", i + 1))))
            .collect();
        store.put_edge_fields(&fields).unwrap();

        let visited = TraversalEngine::new(&store).run(&name("n0")).unwrap();
        assert_eq!(visited.len(), 200_001);
        assert_eq!(visited.degree(&name("n200000")), Some(0));
    }

    #[test]
    fn test_fetch_failure_is_all_or_nothing() {
        let memory = MemoryStore::new();
        directed(&memory, &[("a", "b"), ("b", "c")]);
        let store = ProbeStore::new(memory, Some("c"));

        let result = TraversalEngine::new(&store).run(&name("a"));
        assert!(matches!(result, Err(GraphError::Store(StoreError::Unavailable(_)))));
    }

    #[test]
    fn test_wrong_type_start() {
        let store = MemoryStore::new();
        store.set_string(&name("s"), Bytes::from_static(b"v")).unwrap();

        let result = TraversalEngine::new(&store).run(&name("s"));
        assert!(matches!(result, Err(GraphError::WrongType { .. })));
    }

    #[test]
    fn test_wrong_type_neighbor_is_leaf() {
        let store = MemoryStore::new();
        directed(&store, &[("a", "s")]);
        store.set_string(&name("s"), Bytes::from_static(b"v")).unwrap();

        let visited = TraversalEngine::new(&store).run(&name("a")).unwrap();
        assert_eq!(
            degrees(visited),
            vec![("a".to_string(), 1), ("s".to_string(), 0)]
        );
    }
}
