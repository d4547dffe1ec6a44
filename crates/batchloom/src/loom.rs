//! The coroutine scheduler: keyed suspend/resume over green threads.
//!
//! Each managed coroutine runs on a dedicated OS thread that makes
//! blocking-style calls, but a single logical "baton" of control is
//! passed between threads so that exactly one of them executes engine
//! code at any moment:
//!
//! - [`Loom::spawn`] starts a coroutine and blocks the spawner until the
//!   child *settles* — suspends on a key or finishes.
//! - [`Loom::wait`] registers the current coroutine in the FIFO waiter
//!   list for a key, hands the baton back to whoever resumed it, and
//!   blocks on its private resume channel.
//! - [`Loom::release`] drains the waiter list for a key *first*, then
//!   resumes each drained waiter in arrival order, blocking until each
//!   settles again. Waiters registered on the same key during the release
//!   land in a fresh list and are not resumed in the same pass.
//!
//! Because control transfer is strictly nested (a resumer always blocks
//! until the resumed coroutine settles), suspension works at arbitrary
//! call depth without any annotation: code deep inside a transform simply
//! blocks on a channel receive. Panics inside a coroutine are caught and
//! re-raised on the thread that resumed it, so an exception propagates
//! across the transferred stacks exactly as it would in straight-line
//! code.
//!
//! A more general design would transfer stacks directly between
//! coroutines instead of bouncing control through the resumer; it handles
//! exotic nesting but is materially harder to keep panic-safe. The
//! strictly nested handoff here is sufficient because nothing in this
//! crate spawns unmanaged concurrency beneath a coroutine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::trace;

use crate::error::{Error, Result};

/// Identifier of a managed coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoroutineId(u64);

impl fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coroutine#{}", self.0)
    }
}

/// How a spawned coroutine first settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spawned {
    /// Ran to completion without ever suspending.
    Finished,
    /// Suspended on a key; it will resume when that key is released.
    Suspended(CoroutineId),
}

enum Settle {
    Suspended,
    Finished,
    Panicked(Box<dyn std::any::Any + Send>),
}

struct Coroutine<P> {
    depth: u32,
    resume_tx: Sender<P>,
    resume_rx: Receiver<P>,
    settle_tx: Sender<Settle>,
    settle_rx: Receiver<Settle>,
}

struct LoomState<K, P> {
    next_id: u64,
    coroutines: HashMap<CoroutineId, Coroutine<P>>,
    waiters: HashMap<K, VecDeque<CoroutineId>>,
    /// Nesting of the currently running coroutines; the top entry is the
    /// one executing right now, empty means root code is running.
    stack: Vec<CoroutineId>,
    /// Spawned and not yet finished (running or suspended).
    live: HashSet<CoroutineId>,
}

/// Keyed suspend/resume scheduler over managed green threads.
pub struct Loom<K, P> {
    state: Mutex<LoomState<K, P>>,
}

impl<K, P> Loom<K, P>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + 'static,
    P: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoomState {
                next_id: 0,
                coroutines: HashMap::new(),
                waiters: HashMap::new(),
                stack: Vec::new(),
                live: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoomState<K, P>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True while any managed coroutine is the current logical runner.
    pub fn in_coroutine(&self) -> bool {
        !self.lock().stack.is_empty()
    }

    /// Nesting depth of the current execution context; root code is 0.
    pub fn current_depth(&self) -> u32 {
        let state = self.lock();
        match state.stack.last() {
            Some(id) => state.coroutines.get(id).map(|c| c.depth).unwrap_or(0),
            None => 0,
        }
    }

    /// Number of coroutines spawned and not yet finished.
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// True if any coroutine is suspended on some key.
    pub fn has_waiters(&self) -> bool {
        self.lock().waiters.values().any(|q| !q.is_empty())
    }

    /// Total suspended coroutines across all keys.
    pub fn waiter_count(&self) -> usize {
        self.lock().waiters.values().map(|q| q.len()).sum()
    }

    /// The keys that currently have suspended waiters.
    pub fn waiting_keys(&self) -> Vec<K> {
        self.lock()
            .waiters
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Starts a managed coroutine and blocks until it settles. The child's
    /// nesting depth is one more than the spawner's.
    pub fn spawn<F>(self: &Arc<Self>, body: F) -> Result<Spawned>
    where
        F: FnOnce() + Send + 'static,
    {
        let (id, settle_rx) = {
            let mut state = self.lock();
            let id = CoroutineId(state.next_id);
            state.next_id += 1;
            let depth = match state.stack.last() {
                Some(parent) => state.coroutines.get(parent).map(|c| c.depth).unwrap_or(0) + 1,
                None => 1,
            };
            let (resume_tx, resume_rx) = bounded(1);
            let (settle_tx, settle_rx) = bounded(1);
            state.coroutines.insert(
                id,
                Coroutine {
                    depth,
                    resume_tx,
                    resume_rx,
                    settle_tx: settle_tx.clone(),
                    settle_rx: settle_rx.clone(),
                },
            );
            state.live.insert(id);
            state.stack.push(id);
            trace!(%id, depth, "coroutine spawned");
            (id, settle_rx)
        };

        let loom = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("batchloom-{}", id.0))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(body));
                let settle_tx = {
                    let mut state = loom.lock();
                    state.live.remove(&id);
                    debug_assert_eq!(state.stack.last(), Some(&id));
                    state.stack.pop();
                    let co = state.coroutines.remove(&id);
                    co.map(|c| c.settle_tx)
                };
                if let Some(tx) = settle_tx {
                    let settle = match outcome {
                        Ok(()) => Settle::Finished,
                        Err(payload) => Settle::Panicked(payload),
                    };
                    let _ = tx.send(settle);
                }
            });

        if let Err(e) = spawned {
            // Roll back the bookkeeping; the coroutine never existed.
            let mut state = self.lock();
            state.live.remove(&id);
            state.stack.pop();
            state.coroutines.remove(&id);
            return Err(Error::runtime(format!("failed to spawn coroutine: {e}")));
        }

        match settle_rx.recv() {
            Ok(Settle::Finished) => Ok(Spawned::Finished),
            Ok(Settle::Suspended) => Ok(Spawned::Suspended(id)),
            Ok(Settle::Panicked(payload)) => resume_unwind(payload),
            Err(_) => Err(Error::runtime("coroutine exited without settling")),
        }
    }

    /// Suspends the current coroutine on `key` until a matching
    /// [`Loom::release`], returning the released payload. Must be called
    /// from within a managed coroutine; the session layer routes unmanaged
    /// forces through its own draining fallback instead.
    pub fn wait(&self, key: K) -> Result<P> {
        let (settle_tx, resume_rx, id) = {
            let mut state = self.lock();
            let id = match state.stack.last().copied() {
                Some(id) => id,
                None => {
                    return Err(Error::runtime(
                        "wait() called outside any managed coroutine",
                    ))
                }
            };
            state.waiters.entry(key.clone()).or_default().push_back(id);
            state.stack.pop();
            let co = state
                .coroutines
                .get(&id)
                .expect("running coroutine missing from registry");
            trace!(%id, ?key, "coroutine waiting");
            (co.settle_tx.clone(), co.resume_rx.clone(), id)
        };

        if settle_tx.send(Settle::Suspended).is_err() {
            return Err(Error::SessionClosed);
        }
        match resume_rx.recv() {
            Ok(payload) => {
                trace!(%id, "coroutine resumed");
                Ok(payload)
            }
            // The loom (and its session) went away while we were parked.
            Err(_) => Err(Error::SessionClosed),
        }
    }

    /// Releases every coroutine currently waiting on `key`, resuming each
    /// with a clone of `payload` in FIFO order. Returns how many were
    /// resumed. Waiters that re-register on the same key during this call
    /// are left for the next release.
    pub fn release(&self, key: &K, payload: P) -> usize {
        let drained: VecDeque<CoroutineId> = {
            let mut state = self.lock();
            state.waiters.remove(key).unwrap_or_default()
        };
        let count = drained.len();
        if count > 0 {
            trace!(?key, count, "releasing waiters");
        }

        for id in drained {
            let channels = {
                let mut state = self.lock();
                match state.coroutines.get(&id) {
                    Some(co) => {
                        let pair = (co.resume_tx.clone(), co.settle_rx.clone());
                        state.stack.push(id);
                        Some(pair)
                    }
                    None => None,
                }
            };
            let Some((resume_tx, settle_rx)) = channels else {
                continue;
            };
            if resume_tx.send(payload.clone()).is_err() {
                // Thread already gone; undo the stack push.
                self.lock().stack.pop();
                continue;
            }
            match settle_rx.recv() {
                Ok(Settle::Suspended) | Ok(Settle::Finished) => {}
                Ok(Settle::Panicked(panic_payload)) => resume_unwind(panic_payload),
                Err(_) => {
                    // Wrapper died without settling; nothing left to do.
                }
            }
        }
        count
    }
}

impl<K, P> Default for Loom<K, P>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + 'static,
    P: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
