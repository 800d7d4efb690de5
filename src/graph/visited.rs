//! Per-traversal visited set
//!
//! Doubles as the "already expanded" test and the traversal result: every
//! node is recorded once, together with its out-degree at fetch time.

use super::types::{Degree, NodeName};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitedSet {
    degrees: FxHashMap<NodeName, Degree>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, node: &NodeName) -> bool {
        self.degrees.contains_key(node)
    }

    /// Record `node` with its degree. A node already present keeps its first degree.
    pub fn set(&mut self, node: NodeName, degree: Degree) {
        self.degrees.entry(node).or_insert(degree);
    }

    pub fn degree(&self, node: &NodeName) -> Option<Degree> {
        self.degrees.get(node).copied()
    }

    pub fn len(&self) -> usize {
        self.degrees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.degrees.is_empty()
    }

    /// Visited nodes in bytewise order of their names
    pub fn iter(&self) -> impl Iterator<Item = (&NodeName, Degree)> {
        let mut entries: Vec<_> = self.degrees.iter().map(|(n, d)| (n, *d)).collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries.into_iter()
    }

    /// Consume the set into `(node, degree)` pairs in bytewise order
    pub fn into_sorted_vec(self) -> Vec<(NodeName, Degree)> {
        let mut entries: Vec<_> = self.degrees.into_iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership() {
        let mut visited = VisitedSet::new();
        assert!(visited.is_empty());
        assert!(!visited.has(&NodeName::from("a")));

        visited.set(NodeName::from("a"), 2);
        assert!(visited.has(&NodeName::from("a")));
        assert_eq!(visited.degree(&NodeName::from("a")), Some(2));
        assert_eq!(visited.len(), 1);
    }

    #[test]
    fn test_first_degree_wins() {
        let mut visited = VisitedSet::new();
        visited.set(NodeName::from("a"), 2);
        visited.set(NodeName::from("a"), 5);
        assert_eq!(visited.degree(&NodeName::from("a")), Some(2));
        assert_eq!(visited.len(), 1);
    }

    #[test]
    fn test_iteration_is_sorted_and_stable() {
        let mut visited = VisitedSet::new();
        for (name, degree) in [("delta", 0), ("alpha", 2), ("charlie", 1), ("bravo", 1)] {
            visited.set(NodeName::from(name), degree);
        }

        let names: Vec<String> = visited.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie", "delta"]);

        let again: Vec<String> = visited.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(names, again);

        let owned = visited.into_sorted_vec();
        assert_eq!(owned[0], (NodeName::from("alpha"), 2));
        assert_eq!(owned[3], (NodeName::from("delta"), 0));
    }
}
