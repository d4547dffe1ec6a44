//! The batch-load collaborator contract.
//!
//! A [`Realizer`] turns a group of ids into values in one bulk operation.
//! The engine owns *when* that happens; the realizer owns *how*. Values
//! returned may themselves be unresolved handles, which is what makes
//! recursive batching work: a realizer can answer "user 3's best friend"
//! with a handle that defers through the same session again.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use indexmap::IndexSet;

use crate::error::Result;
use crate::handle::Deferred;

/// Identity of a registered realizer instance within a session.
///
/// Targets and events are keyed by value, not by object identity, so two
/// registrations of the same underlying realizer are two distinct sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub(crate) u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// An append-only, de-duplicating id sequence with stable insertion order.
///
/// Iteration order is load-bearing: `Event::realize` walks the group in
/// insertion order to route each result back to its waiters.
#[derive(Debug, Clone)]
pub struct Group<Id> {
    ids: IndexSet<Id>,
}

impl<Id: Eq + Hash> Group<Id> {
    pub fn new() -> Self {
        Self {
            ids: IndexSet::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: IndexSet::with_capacity(capacity),
        }
    }

    /// Appends an id, returning true if it was not already present.
    pub fn append(&mut self, id: Id) -> bool {
        self.ids.insert(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.ids.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Id> {
        self.ids.iter()
    }
}

impl<Id: Eq + Hash> Default for Group<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: Eq + Hash> FromIterator<Id> for Group<Id> {
    fn from_iter<I: IntoIterator<Item = Id>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// One entry of a realizer's result map: a plain value, or a handle that
/// will produce the value later (recursive batching).
pub enum Fetched<V> {
    Value(V),
    Handle(Deferred<Option<V>>),
}

impl<V: Clone> Clone for Fetched<V> {
    fn clone(&self) -> Self {
        match self {
            Fetched::Value(v) => Fetched::Value(v.clone()),
            Fetched::Handle(h) => Fetched::Handle(h.clone()),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Fetched<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fetched::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Fetched::Handle(h) => f.debug_tuple("Handle").field(h).finish(),
        }
    }
}

/// Pluggable batch loader.
///
/// `group_key` partitions ids into batchable groups (a realizer backed by
/// several tables might key by table); `new_group` lets an implementation
/// pre-size or specialize the accumulator; `call` performs the bulk fetch.
///
/// `call` is all-or-nothing: on error the whole batch fails and no id in
/// the group receives a value. Ids absent from the returned map resolve to
/// `None` for their waiters — absence is data, not an error.
pub trait Realizer: Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    type GroupKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;

    /// The batching group an id belongs to.
    fn group_key(&self, id: &Self::Id) -> Self::GroupKey;

    /// A fresh accumulator for one batch.
    fn new_group(&self, key: &Self::GroupKey) -> Group<Self::Id> {
        let _ = key;
        Group::new()
    }

    /// Performs the bulk fetch for every id in `group`.
    fn call(&self, group: &Group<Self::Id>) -> Result<HashMap<Self::Id, Fetched<Self::Value>>>;
}
