//! Mock realizers and tracers for session testing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::handle::Deferred;
use crate::realizer::{Fetched, Group, Realizer};
use crate::trace::Tracer;

/// Shared, ordered record of every bulk call made during a test.
#[derive(Default)]
pub struct CallLog {
    calls: Mutex<Vec<(String, Vec<u64>)>>,
}

impl CallLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, name: &str, ids: Vec<u64>) {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), ids));
    }

    pub fn calls(&self) -> Vec<(String, Vec<u64>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

/// Configurable u64 → String realizer. Values are `"{name}:{id}"`.
pub struct MockRealizer {
    name: String,
    log: Arc<CallLog>,
    group_by: fn(&u64) -> u64,
    missing: HashSet<u64>,
    fail: bool,
    handles: Mutex<HashMap<u64, Deferred<Option<String>>>>,
}

impl MockRealizer {
    pub fn new(name: &str, log: Arc<CallLog>) -> Self {
        Self {
            name: name.to_string(),
            log,
            group_by: |_| 0,
            missing: HashSet::new(),
            fail: false,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the grouping function (default: everything in group 0).
    pub fn with_group_by(mut self, group_by: fn(&u64) -> u64) -> Self {
        self.group_by = group_by;
        self
    }

    /// Ids the realizer will omit from its result map.
    pub fn with_missing(mut self, ids: &[u64]) -> Self {
        self.missing = ids.iter().copied().collect();
        self
    }

    /// Makes every call fail.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Answers `id` with a handle instead of a value (recursive
    /// batching). Callable after registration through the `Arc`.
    pub fn add_handle(&self, id: u64, handle: Deferred<Option<String>>) {
        self.handles.lock().unwrap().insert(id, handle);
    }

    pub fn value_for(name: &str, id: u64) -> String {
        format!("{name}:{id}")
    }
}

impl Realizer for MockRealizer {
    type Id = u64;
    type GroupKey = u64;
    type Value = String;

    fn group_key(&self, id: &u64) -> u64 {
        (self.group_by)(id)
    }

    fn call(&self, group: &Group<u64>) -> Result<HashMap<u64, Fetched<String>>> {
        let ids: Vec<u64> = group.iter().copied().collect();
        self.log.record(&self.name, ids.clone());
        if self.fail {
            return Err(Error::realize(format!("{} refused the batch", self.name)));
        }
        let handles = self.handles.lock().unwrap();
        Ok(ids
            .into_iter()
            .filter(|id| !self.missing.contains(id))
            .map(|id| {
                let fetched = match handles.get(&id) {
                    Some(handle) => Fetched::Handle(handle.clone()),
                    None => Fetched::Value(Self::value_for(&self.name, id)),
                };
                (id, fetched)
            })
            .collect())
    }
}

/// Tracer that counts the hooks tests care about.
#[derive(Default)]
pub struct CountingTracer {
    pub events_realized: AtomicUsize,
    pub coroutines_created: AtomicUsize,
    pub cache_hits: AtomicUsize,
    pub deadlocks: AtomicUsize,
}

impl Tracer for CountingTracer {
    fn event_realized(&self, _batch_size: usize) {
        self.events_realized.fetch_add(1, Ordering::SeqCst);
    }

    fn coroutine_created(&self, _depth: u32) {
        self.coroutines_created.fetch_add(1, Ordering::SeqCst);
    }

    fn value_cached(&self) {
        self.cache_hits.fetch_add(1, Ordering::SeqCst);
    }

    fn finalize_deadlocked(&self, _suspended: usize) {
        self.deadlocks.fetch_add(1, Ordering::SeqCst);
    }
}
