//! Registry of in-flight batch events.
//!
//! The scheduler owns every pending [`Event`], keyed by
//! `(source, group key)`, and consults its [`Policy`] for pop order. It
//! is deliberately passive: the session decides *when* to pop and
//! realize; the scheduler only keeps the bookkeeping exact — an event's
//! group contains precisely the ids registered between its creation and
//! the moment it is popped.

mod event;
pub mod policy;

use std::collections::HashMap;

pub use event::{Event, Target};
pub use policy::{DepthPolicy, EventKey, EventPriority, Policy};

use crate::realizer::Realizer;

struct Pending<R: Realizer> {
    event: Event<R>,
    seq: u64,
}

pub(crate) struct Scheduler<R: Realizer> {
    events: HashMap<EventKey<R::GroupKey>, Pending<R>>,
    policy: Box<dyn Policy<R::GroupKey>>,
    next_seq: u64,
}

impl<R: Realizer> Scheduler<R> {
    pub(crate) fn new(policy: Box<dyn Policy<R::GroupKey>>) -> Self {
        Self {
            events: HashMap::new(),
            policy,
            next_seq: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    /// Registers a target: merges the id into the pending event for its
    /// `(source, group key)`, creating the event if none is in flight.
    pub(crate) fn add(&mut self, target: &Target<R::Id, R::GroupKey>, realizer: &R) {
        let key = EventKey {
            source: target.source,
            group_key: target.group_key.clone(),
        };
        match self.events.get_mut(&key) {
            Some(pending) => {
                if pending.event.append(target.id.clone()) {
                    self.policy.event_updated(&key, pending.event.len());
                }
            }
            None => {
                let mut group = realizer.new_group(&target.group_key);
                group.append(target.id.clone());
                let event = Event::new(target.source, target.group_key.clone(), group);
                let seq = self.next_seq;
                self.next_seq += 1;
                self.events.insert(key.clone(), Pending { event, seq });
                self.policy.event_added(&key, seq);
            }
        }
    }

    /// Notes that a coroutine at `depth` is blocked on the target's
    /// event. No-op if the event is no longer (or was never) pending.
    pub(crate) fn wait_on(&mut self, target: &Target<R::Id, R::GroupKey>, depth: u32) {
        let key = EventKey {
            source: target.source,
            group_key: target.group_key.clone(),
        };
        if self.events.contains_key(&key) {
            self.policy.wait_on(&key, depth);
        }
    }

    /// Removes and returns the event the policy ranks highest; when the
    /// policy punts, the oldest still-pending event is popped instead.
    pub(crate) fn pop_next(&mut self) -> Option<Event<R>> {
        if self.events.is_empty() {
            return None;
        }
        let key = match self.policy.next_key() {
            Some(key) if self.events.contains_key(&key) => key,
            _ => self
                .events
                .iter()
                .min_by_key(|(_, pending)| pending.seq)
                .map(|(key, _)| key.clone())?,
        };
        self.take(&key)
    }

    /// Removes and returns the specific event a target belongs to,
    /// bypassing the policy. Used for targeted forcing.
    pub(crate) fn force_pop(&mut self, target: &Target<R::Id, R::GroupKey>) -> Option<Event<R>> {
        let key = EventKey {
            source: target.source,
            group_key: target.group_key.clone(),
        };
        self.take(&key)
    }

    fn take(&mut self, key: &EventKey<R::GroupKey>) -> Option<Event<R>> {
        let pending = self.events.remove(key)?;
        self.policy.event_removed(key);
        Some(pending.event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::realizer::{Fetched, Group, SourceId};
    use std::collections::HashMap;

    struct Doubler;

    impl Realizer for Doubler {
        type Id = u64;
        type GroupKey = u8;
        type Value = u64;

        fn group_key(&self, id: &u64) -> u8 {
            (*id % 2) as u8
        }

        fn call(&self, group: &Group<u64>) -> Result<HashMap<u64, Fetched<u64>>> {
            Ok(group.iter().map(|id| (*id, Fetched::Value(id * 2))).collect())
        }
    }

    fn scheduler() -> Scheduler<Doubler> {
        Scheduler::new(Box::new(DepthPolicy::new()))
    }

    fn target(source: u32, id: u64) -> Target<u64, u8> {
        Target::new(SourceId(source), id, (id % 2) as u8)
    }

    #[test]
    fn test_same_group_key_merges_into_one_event() {
        let mut scheduler = scheduler();
        scheduler.add(&target(0, 2), &Doubler);
        scheduler.add(&target(0, 4), &Doubler);
        scheduler.add(&target(0, 6), &Doubler);

        assert_eq!(scheduler.len(), 1);
        let event = scheduler.pop_next().unwrap();
        assert_eq!(event.len(), 3);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_distinct_group_keys_stay_separate() {
        let mut scheduler = scheduler();
        scheduler.add(&target(0, 1), &Doubler);
        scheduler.add(&target(0, 2), &Doubler);

        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn test_distinct_sources_stay_separate() {
        let mut scheduler = scheduler();
        scheduler.add(&target(0, 2), &Doubler);
        scheduler.add(&target(1, 2), &Doubler);

        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn test_duplicate_id_is_absorbed() {
        let mut scheduler = scheduler();
        scheduler.add(&target(0, 2), &Doubler);
        scheduler.add(&target(0, 2), &Doubler);

        let event = scheduler.pop_next().unwrap();
        assert_eq!(event.len(), 1);
    }

    #[test]
    fn test_ids_after_pop_start_a_fresh_event() {
        let mut scheduler = scheduler();
        scheduler.add(&target(0, 2), &Doubler);
        let first = scheduler.pop_next().unwrap();
        assert_eq!(first.len(), 1);

        scheduler.add(&target(0, 4), &Doubler);
        let second = scheduler.pop_next().unwrap();
        assert_eq!(second.len(), 1);
        let pairs = second.realize(&Doubler).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.id, 4);
    }

    #[test]
    fn test_force_pop_returns_the_targets_event() {
        let mut scheduler = scheduler();
        scheduler.add(&target(0, 1), &Doubler);
        scheduler.add(&target(0, 2), &Doubler);

        let event = scheduler.force_pop(&target(0, 2)).unwrap();
        assert_eq!(event.group_key(), &0);
        assert_eq!(scheduler.len(), 1);

        assert!(scheduler.force_pop(&target(0, 2)).is_none());
    }

    #[test]
    fn test_realize_routes_missing_ids_as_none() {
        struct Partial;
        impl Realizer for Partial {
            type Id = u64;
            type GroupKey = u8;
            type Value = u64;
            fn group_key(&self, _id: &u64) -> u8 {
                0
            }
            fn call(&self, group: &Group<u64>) -> Result<HashMap<u64, Fetched<u64>>> {
                // Answer only even ids.
                Ok(group
                    .iter()
                    .filter(|id| *id % 2 == 0)
                    .map(|id| (*id, Fetched::Value(*id)))
                    .collect())
            }
        }

        let mut scheduler: Scheduler<Partial> = Scheduler::new(Box::new(DepthPolicy::new()));
        scheduler.add(&Target::new(SourceId(0), 1, 0), &Partial);
        scheduler.add(&Target::new(SourceId(0), 2, 0), &Partial);

        let pairs = scheduler.pop_next().unwrap().realize(&Partial).unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs[0].1.is_none(), "id 1 has no result");
        assert!(pairs[1].1.is_some(), "id 2 has a result");
    }

    #[test]
    fn test_wait_on_unknown_target_is_a_noop() {
        let mut scheduler = scheduler();
        scheduler.wait_on(&target(0, 2), 1);
        assert!(scheduler.pop_next().is_none());
    }
}
