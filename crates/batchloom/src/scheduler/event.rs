//! Batch identity and accumulation types.

use std::fmt;

use crate::error::Result;
use crate::realizer::{Fetched, Group, Realizer, SourceId};

/// Identity of one deferred request: which source, which id, which batch
/// group. Compared by value so that equal requests merge regardless of
/// where their handles live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target<Id, G> {
    pub source: SourceId,
    pub id: Id,
    pub group_key: G,
}

impl<Id, G> Target<Id, G> {
    pub fn new(source: SourceId, id: Id, group_key: G) -> Self {
        Self {
            source,
            id,
            group_key,
        }
    }
}

impl<Id: fmt::Debug, G: fmt::Debug> fmt::Display for Target<Id, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}@{:?}", self.source, self.id, self.group_key)
    }
}

/// An in-flight batch accumulating ids for one `(source, group key)`.
///
/// Created when the first target for the pair is registered, destroyed
/// the moment it is popped: realization consumes the event, and ids
/// registered afterwards start a fresh one.
pub struct Event<R: Realizer> {
    source: SourceId,
    group_key: R::GroupKey,
    group: Group<R::Id>,
}

impl<R: Realizer> Event<R> {
    pub(crate) fn new(source: SourceId, group_key: R::GroupKey, group: Group<R::Id>) -> Self {
        Self {
            source,
            group_key,
            group,
        }
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn group_key(&self) -> &R::GroupKey {
        &self.group_key
    }

    /// Adds an id to the batch; duplicates are absorbed.
    pub fn append(&mut self, id: R::Id) -> bool {
        self.group.append(id)
    }

    pub fn len(&self) -> usize {
        self.group.len()
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty()
    }

    /// Performs the bulk fetch and routes results back to their targets.
    ///
    /// Consumes the event: there is no partial retry. Every id in the
    /// group yields a pair in insertion order; ids the realizer's result
    /// map does not cover yield `None` — absence is data, not an error.
    /// A realizer error propagates as-is and the whole batch is lost.
    pub fn realize(
        self,
        realizer: &R,
    ) -> Result<Vec<(Target<R::Id, R::GroupKey>, Option<Fetched<R::Value>>)>> {
        let mut results = realizer.call(&self.group)?;
        Ok(self
            .group
            .iter()
            .map(|id| {
                let target = Target::new(self.source, id.clone(), self.group_key.clone());
                let value = results.remove(id);
                (target, value)
            })
            .collect())
    }
}

impl<R: Realizer> fmt::Debug for Event<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("source", &self.source)
            .field("group_key", &self.group_key)
            .field("len", &self.group.len())
            .finish()
    }
}
