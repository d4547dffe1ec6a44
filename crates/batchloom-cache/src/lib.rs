//! batchloom-cache: cache-adapter shims for realizers.
//!
//! A [`CachedRealizer`] layers a [`CacheStore`] over any
//! [`Realizer`](batchloom::Realizer): bulk calls consult the store first
//! and only the uncached subset reaches the wrapped realizer. Cached
//! hits count toward the same result map, so call sites cannot tell the
//! difference.
//!
//! Two stores ship in-tree: [`MemoryStore`] (DashMap with per-entry
//! expiry) and [`MokaStore`] (Moka sync cache with store-level TTL).

mod memory;
mod moka_store;

use std::collections::HashMap;
use std::time::Duration;

use batchloom::{Fetched, Group, Realizer, Result};
use tracing::debug;

pub use memory::MemoryStore;
pub use moka_store::MokaStore;

/// Write options for cache stores.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Per-entry time-to-live. Stores without per-entry expiry may apply
    /// their configured store-level TTL instead.
    pub ttl: Option<Duration>,
}

impl SetOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Key-value store a cached realizer reads through.
pub trait CacheStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;

    fn set(&self, key: K, value: V, opts: &SetOptions);

    /// Bulk lookup; the default loops over `get`.
    fn get_multi(&self, keys: &[K]) -> HashMap<K, V>
    where
        K: Clone + Eq + std::hash::Hash,
    {
        keys.iter()
            .filter_map(|key| self.get(key).map(|value| (key.clone(), value)))
            .collect()
    }

    /// Bulk write; the default loops over `set`.
    fn set_multi(&self, entries: HashMap<K, V>, opts: &SetOptions) {
        for (key, value) in entries {
            self.set(key, value, opts);
        }
    }
}

/// A realizer that serves hits from a cache store and defers only the
/// uncached subset to the wrapped realizer.
///
/// Only plain values are written back: results the inner realizer
/// answers with handles are passed through uncached, since their final
/// values are not known at call time.
pub struct CachedRealizer<R: Realizer, S> {
    inner: R,
    store: S,
    write_opts: SetOptions,
}

impl<R, S> CachedRealizer<R, S>
where
    R: Realizer,
    S: CacheStore<R::Id, R::Value>,
{
    pub fn new(inner: R, store: S) -> Self {
        Self {
            inner,
            store,
            write_opts: SetOptions::default(),
        }
    }

    /// Options applied to every write-back.
    pub fn with_write_options(mut self, opts: SetOptions) -> Self {
        self.write_opts = opts;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<R, S> Realizer for CachedRealizer<R, S>
where
    R: Realizer,
    S: CacheStore<R::Id, R::Value> + Send + Sync + 'static,
{
    type Id = R::Id;
    type GroupKey = R::GroupKey;
    type Value = R::Value;

    fn group_key(&self, id: &Self::Id) -> Self::GroupKey {
        self.inner.group_key(id)
    }

    fn new_group(&self, key: &Self::GroupKey) -> Group<Self::Id> {
        self.inner.new_group(key)
    }

    fn call(&self, group: &Group<Self::Id>) -> Result<HashMap<Self::Id, Fetched<Self::Value>>> {
        let ids: Vec<R::Id> = group.iter().cloned().collect();
        let mut hits = self.store.get_multi(&ids);
        metrics::counter!("batchloom_cache_hits_total").increment(hits.len() as u64);
        metrics::counter!("batchloom_cache_misses_total")
            .increment((ids.len() - hits.len()) as u64);

        let mut results: HashMap<R::Id, Fetched<R::Value>> = HashMap::with_capacity(ids.len());
        let mut misses: Option<Group<R::Id>> = None;
        for id in &ids {
            match hits.remove(id) {
                Some(value) => {
                    results.insert(id.clone(), Fetched::Value(value));
                }
                None => {
                    misses
                        .get_or_insert_with(|| self.inner.new_group(&self.inner.group_key(id)))
                        .append(id.clone());
                }
            }
        }

        if let Some(misses) = misses {
            debug!(
                misses = misses.len(),
                total = ids.len(),
                "fetching uncached subset"
            );
            let fetched = self.inner.call(&misses)?;
            let mut write_back: HashMap<R::Id, R::Value> = HashMap::new();
            for (id, entry) in fetched {
                if let Fetched::Value(value) = &entry {
                    write_back.insert(id.clone(), value.clone());
                }
                results.insert(id, entry);
            }
            if !write_back.is_empty() {
                self.store.set_multi(write_back, &self.write_opts);
            }
        }

        Ok(results)
    }
}

/// Registers cache metric descriptions with the metrics recorder.
/// Optional; call once during application startup.
pub fn register_cache_metrics() {
    metrics::describe_counter!(
        "batchloom_cache_hits_total",
        "Total realizer-cache hits served without a bulk fetch"
    );
    metrics::describe_counter!(
        "batchloom_cache_misses_total",
        "Total ids that had to reach the underlying realizer"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    pub(crate) struct UpperRealizer {
        pub calls: Mutex<Vec<Vec<u32>>>,
    }

    impl UpperRealizer {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Realizer for UpperRealizer {
        type Id = u32;
        type GroupKey = ();
        type Value = String;

        fn group_key(&self, _id: &u32) {}

        fn call(&self, group: &Group<u32>) -> Result<HashMap<u32, Fetched<String>>> {
            let ids: Vec<u32> = group.iter().copied().collect();
            self.calls.lock().unwrap().push(ids.clone());
            Ok(ids
                .into_iter()
                .map(|id| (id, Fetched::Value(format!("V{id}"))))
                .collect())
        }
    }

    fn cached() -> CachedRealizer<UpperRealizer, MemoryStore<u32, String>> {
        CachedRealizer::new(UpperRealizer::new(), MemoryStore::new())
    }

    fn group_of(ids: &[u32]) -> Group<u32> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_first_call_misses_and_populates_the_store() {
        let realizer = cached();

        let results = realizer.call(&group_of(&[1, 2])).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(realizer.inner.calls.lock().unwrap().len(), 1);
        assert_eq!(realizer.store().get(&1), Some("V1".to_string()));
    }

    #[test]
    fn test_cached_ids_do_not_reach_the_inner_realizer() {
        // Arrange - warm the store with id 1
        let realizer = cached();
        realizer.call(&group_of(&[1])).unwrap();

        // Act - ask for a mix of cached and uncached
        let results = realizer.call(&group_of(&[1, 2, 3])).unwrap();

        // Assert - only the uncached subset was fetched
        assert_eq!(results.len(), 3);
        let calls = realizer.inner.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![vec![1], vec![2, 3]]);
    }

    #[test]
    fn test_fully_cached_group_makes_no_inner_call() {
        let realizer = cached();
        realizer.call(&group_of(&[1, 2])).unwrap();

        let results = realizer.call(&group_of(&[1, 2])).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(realizer.inner.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_handle_results_are_not_written_back() {
        struct HandleRealizer;
        impl Realizer for HandleRealizer {
            type Id = u32;
            type GroupKey = ();
            type Value = String;
            fn group_key(&self, _id: &u32) {}
            fn call(&self, group: &Group<u32>) -> Result<HashMap<u32, Fetched<String>>> {
                Ok(group
                    .iter()
                    .map(|id| {
                        (
                            *id,
                            Fetched::Handle(batchloom::Deferred::ready(Some("lazy".to_string()))),
                        )
                    })
                    .collect())
            }
        }

        let realizer = CachedRealizer::new(HandleRealizer, MemoryStore::new());
        realizer.call(&group_of(&[1])).unwrap();

        assert_eq!(realizer.store().get(&1), None);
    }

    #[test]
    fn test_works_as_a_session_realizer() {
        // The adapter is itself a realizer; a second session run over the
        // same store skips the backend entirely.
        use batchloom::{Session, SessionConfig};

        let store = MemoryStore::new();
        let fetches = Arc::new(AtomicUsize::new(0));

        struct CountingRealizer(Arc<AtomicUsize>);
        impl Realizer for CountingRealizer {
            type Id = u32;
            type GroupKey = ();
            type Value = String;
            fn group_key(&self, _id: &u32) {}
            fn call(&self, group: &Group<u32>) -> Result<HashMap<u32, Fetched<String>>> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(group
                    .iter()
                    .map(|id| (*id, Fetched::Value(format!("V{id}"))))
                    .collect())
            }
        }

        for round in 0..2 {
            let session = Session::new(SessionConfig::default());
            let source = session.register(Arc::new(CachedRealizer::new(
                CountingRealizer(Arc::clone(&fetches)),
                store.clone(),
            )));
            let value = source.load(8).unwrap().force().unwrap();
            assert_eq!(value, Some("V8".to_string()), "round {round}");
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }
}
