//! Striped key locks
//!
//! Every write that depends on a key's shape runs while holding the stripes of
//! the keys involved. Stripes are taken in ascending index order, and a stripe
//! shared by two keys (including a self-loop edge) is taken once.

use super::types::NodeName;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_STRIPES: usize = 256;

#[derive(Debug)]
pub struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

/// Holds the stripes for a set of keys until dropped
#[must_use = "the keys are only locked while the guard is alive"]
pub struct KeyGuard<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
}

impl KeyLocks {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn stripe_of(&self, key: &NodeName) -> usize {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }

    /// Lock every key in `keys`
    pub fn lock<'a>(&'a self, keys: &[&NodeName]) -> KeyGuard<'a> {
        let mut indices: Vec<usize> = keys.iter().map(|k| self.stripe_of(k)).collect();
        indices.sort_unstable();
        indices.dedup();

        let guards = indices
            .into_iter()
            // Stripes guard no data, so poisoning is harmless
            .map(|i| self.stripes[i].lock().unwrap_or_else(|e| e.into_inner()))
            .collect();

        KeyGuard { _guards: guards }
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_self_loop_does_not_deadlock() {
        let locks = KeyLocks::new(4);
        let a = NodeName::from("a");
        let _guard = locks.lock(&[&a, &a]);
    }

    #[test]
    fn test_single_stripe_pairs() {
        // With one stripe every pair collapses onto the same mutex
        let locks = KeyLocks::new(1);
        let a = NodeName::from("a");
        let b = NodeName::from("b");
        drop(locks.lock(&[&a, &b]));
        drop(locks.lock(&[&b, &a]));
        assert_eq!(locks.stripe_count(), 1);
    }

    #[test]
    fn test_zero_stripes_is_clamped() {
        assert_eq!(KeyLocks::new(0).stripe_count(), 1);
    }

    #[test]
    fn test_lock_excludes_concurrent_holders() {
        let locks = Arc::new(KeyLocks::new(8));
        let inside = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for i in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            handles.push(thread::spawn(move || {
                let a = NodeName::from("shared");
                let b = NodeName::from(format!("other-{}", i));
                for _ in 0..200 {
                    // Opposite argument orders must not deadlock
                    let _guard = if i % 2 == 0 {
                        locks.lock(&[&a, &b])
                    } else {
                        locks.lock(&[&b, &a])
                    };
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
