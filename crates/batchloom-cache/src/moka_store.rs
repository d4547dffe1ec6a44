//! Moka-backed cache store.

use std::hash::Hash;
use std::time::Duration;

use moka::sync::Cache;

use crate::{CacheStore, SetOptions};

/// Cache store on top of Moka's sync cache: lock-free concurrent reads,
/// memory-bounded storage, automatic store-level TTL eviction.
///
/// Moka applies one TTL to the whole cache, so per-call
/// [`SetOptions::ttl`] is ignored here; use [`MemoryStore`] when entries
/// need individual lifetimes.
///
/// [`MemoryStore`]: crate::MemoryStore
#[derive(Clone)]
pub struct MokaStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache: Cache<K, V>,
}

impl<K, V> MokaStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// A store holding up to `max_capacity` entries with no expiry.
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_capacity).build(),
        }
    }

    /// A store whose entries expire `ttl` after insertion.
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs pending maintenance; useful for deterministic eviction in
    /// tests.
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }

    pub fn invalidate(&self, key: &K) {
        self.cache.invalidate(key);
    }
}

impl<K, V> CacheStore<K, V> for MokaStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key)
    }

    fn set(&self, key: K, value: V, _opts: &SetOptions) {
        self.cache.insert(key, value);
    }
}
