//! The per-unit-of-work coordinator.
//!
//! A [`Session`] wires together one [`Loom`], one scheduler with its
//! policy, a result cache, and the realizer instances registered against
//! it. Call sites ask a [`Source`] for single values and get lazy
//! handles back; the session merges everything pending into grouped bulk
//! fetches and releases waiters when batches realize.
//!
//! Scope is one logical unit of work: the session is shared through
//! `Arc`, handles hold `Weak` references back to it, and dropping the
//! last `Arc` invalidates every outstanding handle.
//!
//! There is no cancellation. A coroutine that suspends resumes only when
//! its key is released; abandoning a session whose drain deadlocked
//! leaves the suspended coroutine threads parked until process exit.
//! Deadlock is a fatal programming error, not a recoverable state.

pub mod config;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use dashmap::DashMap;
use tracing::{debug, warn};

pub use config::SessionConfig;

use crate::error::{Error, Result};
use crate::handle::{Deferred, Step};
use crate::loom::Loom;
use crate::realizer::{Fetched, Realizer, SourceId};
use crate::scheduler::policy::Policy;
use crate::scheduler::{DepthPolicy, Scheduler, Target};

/// What a target resolved to: `None` when the realizer's result map did
/// not cover the id.
pub type Resolution<V> = Option<Fetched<V>>;

/// Suspension key: either a batch target or a worker completion slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum WaitKey<Id, G> {
    Target(Target<Id, G>),
    Slot(u64),
}

/// Payload delivered to resumed waiters.
#[derive(Clone)]
pub(crate) enum Wake<V> {
    Resolution(Resolution<V>),
    Slot,
}

pub(crate) type SessionLoom<R> = Loom<
    WaitKey<<R as Realizer>::Id, <R as Realizer>::GroupKey>,
    Wake<<R as Realizer>::Value>,
>;

/// Per-unit-of-work batching coordinator.
pub struct Session<R: Realizer> {
    config: SessionConfig,
    loom: Arc<SessionLoom<R>>,
    scheduler: Mutex<Scheduler<R>>,
    cache: DashMap<Target<R::Id, R::GroupKey>, Resolution<R::Value>>,
    sources: Mutex<Vec<Arc<R>>>,
    slot_seq: AtomicU64,
}

impl<R: Realizer> Session<R> {
    /// Creates a session with the default depth-ordered policy.
    pub fn new(config: SessionConfig) -> Arc<Self> {
        Self::with_policy(config, DepthPolicy::new())
    }

    /// Creates a session with a custom pop-order policy.
    pub fn with_policy<P>(config: SessionConfig, policy: P) -> Arc<Self>
    where
        P: Policy<R::GroupKey> + 'static,
    {
        Arc::new(Self {
            config,
            loom: Arc::new(Loom::new()),
            scheduler: Mutex::new(Scheduler::new(Box::new(policy))),
            cache: DashMap::new(),
            sources: Mutex::new(Vec::new()),
            slot_seq: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Registers a realizer instance, returning the source handle used to
    /// defer loads through it. Each registration is a distinct source.
    pub fn register(self: &Arc<Self>, realizer: Arc<R>) -> Source<R> {
        let mut sources = lock(&self.sources);
        let id = SourceId(sources.len() as u32);
        sources.push(realizer);
        Source {
            session: Arc::downgrade(self),
            id,
        }
    }

    fn realizer(&self, source: SourceId) -> Result<Arc<R>> {
        lock(&self.sources)
            .get(source.0 as usize)
            .cloned()
            .ok_or(Error::UnknownSource { source_id: source })
    }

    /// Requests the value for `id` through `source`.
    ///
    /// A cache hit returns an already-settled handle without touching the
    /// scheduler. A miss registers the target — merging it into the
    /// pending event for its `(source, group key)` — and returns a handle
    /// that suspends the forcing coroutine until the batch realizes (or,
    /// outside any coroutine, drains pending state on the spot).
    pub fn defer(self: &Arc<Self>, source: SourceId, id: R::Id) -> Result<Deferred<Option<R::Value>>> {
        let realizer = self.realizer(source)?;
        let group_key = realizer.group_key(&id);

        if !self.config.enabled {
            // Batching bypassed: realize the single id synchronously.
            let mut group = realizer.new_group(&group_key);
            group.append(id.clone());
            let mut results = realizer.call(&group)?;
            self.config.tracer.event_realized(1);
            return Ok(settled(results.remove(&id)));
        }

        let target = Target::new(source, id, group_key);
        if let Some(hit) = self.cache.get(&target) {
            self.config.tracer.value_cached();
            return Ok(settled(hit.value().clone()));
        }

        {
            let mut scheduler = lock(&self.scheduler);
            scheduler.add(&target, realizer.as_ref());
        }
        self.config.tracer.value_deferred();
        self.config.tracer.handle_created();

        let session = Arc::downgrade(self);
        Ok(Deferred::new(move || {
            let session = session.upgrade().ok_or(Error::SessionClosed)?;
            let resolution = session.await_target(&target)?;
            session.config.tracer.handle_resolved();
            Ok(match resolution {
                None => Step::Done(None),
                Some(Fetched::Value(value)) => Step::Done(Some(value)),
                Some(Fetched::Handle(next)) => Step::Chain(next),
            })
        }))
    }

    /// Writes a resolved value into the cache and releases every waiter
    /// for the target in FIFO order.
    pub fn dispatch(&self, target: Target<R::Id, R::GroupKey>, resolution: Resolution<R::Value>) {
        self.cache.insert(target.clone(), resolution.clone());
        self.config.tracer.value_dispatched();
        let released = self
            .loom
            .release(&WaitKey::Target(target), Wake::Resolution(resolution));
        if released > 0 {
            self.config.tracer.coroutine_released(released);
        }
    }

    /// Drains the scheduler: pops the highest-priority event and realizes
    /// it, dispatching every resulting pair, until nothing is pending.
    ///
    /// A realizer error propagates immediately; the failed event is
    /// consumed but the rest of the registry stays intact, so a caller
    /// may keep draining. After a clean drain, coroutines still suspended
    /// can never be released — that is a deadlock.
    pub fn finalize(self: &Arc<Self>) -> Result<()> {
        self.config.tracer.finalize_started();
        loop {
            // The scheduler guard must not be held while realizing: the
            // realizer and resumed coroutines re-enter the scheduler.
            let event = { lock(&self.scheduler).pop_next() };
            let Some(event) = event else { break };
            self.config.tracer.finalize_step(event.len());
            self.realize_event(event)?;
        }
        debug_assert!(lock(&self.scheduler).is_empty());
        if self.loom.has_waiters() {
            let suspended = self.loom.waiter_count();
            warn!(suspended, "finalize drained with coroutines still suspended");
            self.config.tracer.finalize_deadlocked(suspended);
            return Err(Error::Deadlock { suspended });
        }
        Ok(())
    }

    /// Number of events still pending.
    pub fn pending_events(&self) -> usize {
        lock(&self.scheduler).len()
    }

    /// Number of coroutines currently suspended on some key.
    pub fn suspended(&self) -> usize {
        self.loom.waiter_count()
    }

    /// Number of coroutines spawned and not yet finished; useful for
    /// verifying nothing leaked after a unit of work completes.
    pub fn live_coroutines(&self) -> usize {
        self.loom.live_count()
    }

    /// Applies `transform` to every item, running call sites concurrently
    /// so their deferred loads batch together. The result preserves input
    /// index order; slots whose transform suspended hold placeholder
    /// handles that force to the eventual value.
    pub fn map<T, U, F>(
        self: &Arc<Self>,
        items: impl IntoIterator<Item = T>,
        transform: F,
    ) -> Result<Vec<Deferred<U>>>
    where
        T: Send + 'static,
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        worker::map(self, items.into_iter().collect(), transform)
    }

    /// Runs one computation in a managed coroutine. If it suspends, a
    /// placeholder handle for its eventual result is returned
    /// immediately.
    pub fn evaluate<U, F>(self: &Arc<Self>, body: F) -> Result<Deferred<U>>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce() -> U + Send + 'static,
    {
        worker::evaluate(self, body)
    }

    /// Folds `items` into an accumulator strictly in input order. Each
    /// step's accumulator is the explicit input of the next, so the chain
    /// is serialized by construction and runs in a single coroutine.
    pub fn fold<T, A, F>(
        self: &Arc<Self>,
        items: impl IntoIterator<Item = T>,
        init: A,
        mut step: F,
    ) -> Result<Deferred<A>>
    where
        T: Send + 'static,
        A: Clone + Send + Sync + 'static,
        F: FnMut(A, T) -> A + Send + 'static,
    {
        let items: Vec<T> = items.into_iter().collect();
        self.evaluate(move || {
            let mut acc = init;
            for item in items {
                acc = step(acc, item);
            }
            acc
        })
    }

    /// Obtains the resolution for a target, suspending inside a managed
    /// coroutine or force-draining from unmanaged code.
    pub(crate) fn await_target(
        self: &Arc<Self>,
        target: &Target<R::Id, R::GroupKey>,
    ) -> Result<Resolution<R::Value>> {
        if let Some(hit) = self.cache.get(target) {
            return Ok(hit.value().clone());
        }
        if self.loom.in_coroutine() {
            {
                let mut scheduler = lock(&self.scheduler);
                scheduler.wait_on(target, self.loom.current_depth());
            }
            self.config.tracer.coroutine_waited();
            match self.loom.wait(WaitKey::Target(target.clone()))? {
                Wake::Resolution(resolution) => {
                    self.config.tracer.value_realized();
                    Ok(resolution)
                }
                Wake::Slot => Err(Error::runtime("target waiter woken by slot signal")),
            }
        } else {
            self.force_target(target)
        }
    }

    /// Unmanaged forcing: realize the target's own event first, then fall
    /// back to a full drain before declaring the target unresolvable.
    fn force_target(
        self: &Arc<Self>,
        target: &Target<R::Id, R::GroupKey>,
    ) -> Result<Resolution<R::Value>> {
        loop {
            if let Some(hit) = self.cache.get(target) {
                return Ok(hit.value().clone());
            }
            let event = { lock(&self.scheduler).force_pop(target) };
            if let Some(event) = event {
                debug!(%target, "force-realizing target's own event");
                self.realize_event(event)?;
                continue;
            }
            self.finalize()?;
            if let Some(hit) = self.cache.get(target) {
                return Ok(hit.value().clone());
            }
            return Err(Error::UnresolvedTarget {
                target: target.to_string(),
            });
        }
    }

    fn realize_event(self: &Arc<Self>, event: crate::scheduler::Event<R>) -> Result<()> {
        let realizer = self.realizer(event.source())?;
        let size = event.len();
        let pairs = event.realize(realizer.as_ref())?;
        self.config.tracer.event_realized(size);
        for (target, resolution) in pairs {
            self.dispatch(target, resolution);
        }
        Ok(())
    }

    /// Pops and realizes one event. Returns false when nothing was
    /// pending.
    pub(crate) fn realize_next(self: &Arc<Self>) -> Result<bool> {
        let event = { lock(&self.scheduler).pop_next() };
        match event {
            Some(event) => {
                self.realize_event(event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Coroutine-bound enforcement: realizing pending events lets
    /// suspended coroutines complete and free slots. With nothing left to
    /// realize the spawn proceeds anyway — blocking could never be
    /// released.
    pub(crate) fn ensure_slot(self: &Arc<Self>) -> Result<()> {
        while self.loom.live_count() >= self.config.max_concurrent {
            if !self.realize_next()? {
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn loom(&self) -> &Arc<SessionLoom<R>> {
        &self.loom
    }

    pub(crate) fn next_slot(&self) -> u64 {
        self.slot_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn release_slot(&self, seq: u64) {
        let released = self.loom.release(&WaitKey::Slot(seq), Wake::Slot);
        if released > 0 {
            self.config.tracer.coroutine_released(released);
        }
    }

    /// Blocks until a worker completion slot holds its value: suspends in
    /// a coroutine, drains events step by step from unmanaged code.
    pub(crate) fn await_slot<U: Clone>(
        self: &Arc<Self>,
        seq: u64,
        cell: &worker::SlotCell<U>,
    ) -> Result<U> {
        loop {
            if let Some(value) = cell.get() {
                return Ok(value);
            }
            if self.loom.in_coroutine() {
                match self.loom.wait(WaitKey::Slot(seq))? {
                    Wake::Slot => continue,
                    Wake::Resolution(_) => {
                        return Err(Error::runtime("slot waiter woken by target signal"))
                    }
                }
            } else if !self.realize_next()? {
                return Err(Error::Deadlock {
                    suspended: self.loom.waiter_count(),
                });
            }
        }
    }
}

fn settled<V>(resolution: Resolution<V>) -> Deferred<Option<V>> {
    match resolution {
        None => Deferred::ready(None),
        Some(Fetched::Value(value)) => Deferred::ready(Some(value)),
        Some(Fetched::Handle(next)) => Deferred::linked(next),
    }
}

/// Poison-tolerant lock: engine state stays usable after a panicking
/// transform unwound through a coroutine.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle to a registered realizer; `load` is the indexed-access sugar
/// over `Session::defer`.
pub struct Source<R: Realizer> {
    session: Weak<Session<R>>,
    id: SourceId,
}

impl<R: Realizer> Clone for Source<R> {
    fn clone(&self) -> Self {
        Self {
            session: Weak::clone(&self.session),
            id: self.id,
        }
    }
}

impl<R: Realizer> Source<R> {
    pub fn id(&self) -> SourceId {
        self.id
    }

    fn session(&self) -> Result<Arc<Session<R>>> {
        self.session.upgrade().ok_or(Error::SessionClosed)
    }

    /// Defers a load of `id` through this source.
    pub fn load(&self, id: R::Id) -> Result<Deferred<Option<R::Value>>> {
        self.session()?.defer(self.id, id)
    }

    /// Defers a load whose id is itself a handle: the id is forced first,
    /// then deferred. A `None` id short-circuits to a `None` value.
    pub fn load_deferred(&self, id: &Deferred<Option<R::Id>>) -> Result<Deferred<Option<R::Value>>> {
        match id.force()? {
            Some(id) => self.load(id),
            None => Ok(Deferred::ready(None)),
        }
    }
}

impl<R: Realizer> std::fmt::Debug for Source<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests;
