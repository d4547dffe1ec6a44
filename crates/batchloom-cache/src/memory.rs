//! In-memory cache store backed by DashMap.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::{CacheStore, SetOptions};

/// Concurrent in-memory store with optional per-entry expiry.
///
/// Expired entries are dropped lazily on read; there is no background
/// sweeper. Cloning is cheap and shares the underlying map.
pub struct MemoryStore<K, V> {
    entries: Arc<DashMap<K, Entry<V>>>,
}

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<K, V> MemoryStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes a single entry.
    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Drops everything.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<K, V> Default for MemoryStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for MemoryStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, V> CacheStore<K, V> for MemoryStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => match entry.expires_at {
                Some(deadline) if Instant::now() >= deadline => true,
                _ => return Some(entry.value.clone()),
            },
            None => return None,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    fn set(&self, key: K, value: V, opts: &SetOptions) {
        let expires_at = opts.ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key, Entry { value, expires_at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn test_set_then_get_round_trips() {
        let store = MemoryStore::new();
        store.set("k", 1, &SetOptions::default());
        assert_eq!(store.get(&"k"), Some(1));
    }

    #[test]
    fn test_missing_key_returns_none() {
        let store: MemoryStore<&str, i32> = MemoryStore::new();
        assert_eq!(store.get(&"ghost"), None);
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let store = MemoryStore::new();
        store.set(
            "k",
            1,
            &SetOptions::default().with_ttl(Duration::from_millis(20)),
        );
        assert_eq!(store.get(&"k"), Some(1));

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(store.get(&"k"), None);
        assert!(store.is_empty(), "expired entry is dropped on read");
    }

    #[test]
    fn test_get_multi_returns_only_present_keys() {
        let store = MemoryStore::new();
        store.set(1, "a", &SetOptions::default());
        store.set(3, "c", &SetOptions::default());

        let found = store.get_multi(&[1, 2, 3]);

        let expected: HashMap<i32, &str> = [(1, "a"), (3, "c")].into_iter().collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_set_multi_writes_every_entry() {
        let store = MemoryStore::new();
        let entries: HashMap<i32, &str> = [(1, "a"), (2, "b")].into_iter().collect();

        store.set_multi(entries, &SetOptions::default());

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&2), Some("b"));
    }

    #[test]
    fn test_invalidate_removes_the_entry() {
        let store = MemoryStore::new();
        store.set("k", 1, &SetOptions::default());
        store.invalidate(&"k");
        assert_eq!(store.get(&"k"), None);
    }
}
