use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use super::RetrievalCache;

/// Exact in-memory cache with no false positives and no persistence.
#[derive(Debug, Default)]
pub struct ExactCache {
    sets: Mutex<HashMap<String, HashSet<String>>>,
}

impl ExactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fingerprints held for `user_id`.
    pub fn len(&self, user_id: &str) -> usize {
        let sets = self.sets.lock().unwrap_or_else(PoisonError::into_inner);
        sets.get(user_id).map_or(0, HashSet::len)
    }
}

impl RetrievalCache for ExactCache {
    fn add(&self, user_id: &str, fingerprint: &str) {
        let mut sets = self.sets.lock().unwrap_or_else(PoisonError::into_inner);
        sets.entry(user_id.to_string())
            .or_default()
            .insert(fingerprint.to_string());
    }

    fn contains(&self, user_id: &str, fingerprint: &str) -> bool {
        let sets = self.sets.lock().unwrap_or_else(PoisonError::into_inner);
        sets.get(user_id)
            .is_some_and(|set| set.contains(fingerprint))
    }

    fn register_user(&self, user_id: &str) {
        let mut sets = self.sets.lock().unwrap_or_else(PoisonError::into_inner);
        sets.entry(user_id.to_string()).or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_then_contains() {
        let cache = ExactCache::new();
        assert!(!cache.contains("u1", "abc"));
        cache.add("u1", "abc");
        cache.add("u1", "abc");
        assert!(cache.contains("u1", "abc"));
        assert!(!cache.contains("u2", "abc"));
        assert_eq!(cache.len("u1"), 1);
    }

    #[test]
    fn test_register_user_keeps_existing_set() {
        let cache = ExactCache::new();
        cache.add("u1", "abc");
        cache.register_user("u1");
        cache.register_user("u2");
        assert!(cache.contains("u1", "abc"));
        assert_eq!(cache.len("u2"), 0);
    }
}
