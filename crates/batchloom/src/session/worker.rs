//! Bounded concurrent enumeration over a sequence.
//!
//! One consumer coroutine greedily claims items and runs the transform
//! until a claim suspends. At that point the consumer has lost the right
//! to keep going: the driver substitutes a placeholder handle at the
//! stalled result index and hands the cursor to a fresh consumer. When
//! the stalled consumer is eventually resumed it finishes its one claim,
//! publishes the value into the placeholder's completion slot, and
//! retires. Index assignment happens at claim time, so output order
//! always matches input order no matter which consumer finishes first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::error::{Error, Result};
use crate::handle::{Deferred, Step};
use crate::loom::Spawned;
use crate::realizer::Realizer;
use crate::session::Session;

/// Completion slot shared between a superseded consumer and the
/// placeholder handle standing in for its result.
pub(crate) struct SlotCell<U> {
    value: Mutex<Option<U>>,
}

impl<U: Clone> SlotCell<U> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    pub(crate) fn get(&self) -> Option<U> {
        self.value.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set(&self, value: U) {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
    }
}

struct RunState<T, U> {
    items: std::vec::IntoIter<T>,
    next_index: usize,
    results: Vec<Option<Deferred<U>>>,
    /// Token of the consumer that currently owns the cursor.
    active: u64,
    /// In-flight claim per consumer token.
    claims: HashMap<u64, usize>,
    /// Completion slot per superseded consumer token.
    cells: HashMap<u64, (Arc<SlotCell<U>>, u64)>,
}

struct MapRun<T, U> {
    state: Mutex<RunState<T, U>>,
}

impl<T, U> MapRun<T, U> {
    fn new(items: Vec<T>) -> Self {
        let total = items.len();
        Self {
            state: Mutex::new(RunState {
                items: items.into_iter(),
                next_index: 0,
                results: (0..total).map(|_| None).collect(),
                active: 0,
                claims: HashMap::new(),
                cells: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState<T, U>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One consumer coroutine: claim, transform, publish, repeat.
fn consume<R, T, U, F>(
    session: Weak<Session<R>>,
    run: Arc<MapRun<T, U>>,
    token: u64,
    transform: Arc<F>,
) where
    R: Realizer,
    T: Send + 'static,
    U: Clone + Send + Sync + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    loop {
        let claim = {
            let mut state = run.lock();
            if state.active != token {
                None
            } else {
                match state.items.next() {
                    Some(item) => {
                        let index = state.next_index;
                        state.next_index += 1;
                        state.claims.insert(token, index);
                        Some((index, item))
                    }
                    // Cursor exhausted: record completion, no successor.
                    None => None,
                }
            }
        };
        let Some((index, item)) = claim else { return };

        // May suspend anywhere inside; when it does, the driver installs
        // a completion slot for this token and moves the cursor on.
        let value = (*transform)(item);

        let slot = {
            let mut state = run.lock();
            if state.active == token {
                state.claims.remove(&token);
                state.results[index] = Some(Deferred::ready(value));
                continue;
            }
            state.cells.remove(&token)
        };
        if let Some((cell, seq)) = slot {
            cell.set(value);
            if let Some(session) = session.upgrade() {
                session.release_slot(seq);
            }
        }
        return;
    }
}

pub(crate) fn map<R, T, U, F>(
    session: &Arc<Session<R>>,
    items: Vec<T>,
    transform: F,
) -> Result<Vec<Deferred<U>>>
where
    R: Realizer,
    T: Send + 'static,
    U: Clone + Send + Sync + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    if !session.config().enabled {
        return Ok(items
            .into_iter()
            .map(|item| Deferred::ready(transform(item)))
            .collect());
    }
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let transform = Arc::new(transform);
    let run = Arc::new(MapRun::new(items));
    let mut token = 0u64;

    loop {
        session.ensure_slot()?;
        session
            .config()
            .tracer
            .coroutine_created(session.loom().current_depth() + 1);

        let consumer_session = Arc::downgrade(session);
        let consumer_run = Arc::clone(&run);
        let consumer_transform = Arc::clone(&transform);
        let outcome = session
            .loom()
            .spawn(move || consume(consumer_session, consumer_run, token, consumer_transform))?;

        match outcome {
            Spawned::Finished => break,
            Spawned::Suspended(_) => {
                let index = {
                    let state = run.lock();
                    state.claims.get(&token).copied()
                };
                let Some(index) = index else {
                    return Err(Error::runtime("consumer suspended without an active claim"));
                };

                let seq = session.next_slot();
                let cell = Arc::new(SlotCell::new());
                {
                    let mut state = run.lock();
                    state.cells.insert(token, (Arc::clone(&cell), seq));
                    state.claims.remove(&token);
                    token += 1;
                    state.active = token;
                }

                let placeholder_session = Arc::downgrade(session);
                let placeholder = Deferred::new(move || {
                    let session = placeholder_session.upgrade().ok_or(Error::SessionClosed)?;
                    let value = session.await_slot(seq, &cell)?;
                    Ok(Step::Done(value))
                });
                session.config().tracer.handle_created();
                run.lock().results[index] = Some(placeholder);
            }
        }
    }

    let results = {
        let mut state = run.lock();
        std::mem::take(&mut state.results)
    };
    results
        .into_iter()
        .map(|slot| slot.ok_or_else(|| Error::runtime("map result slot left unfilled")))
        .collect()
}

pub(crate) fn evaluate<R, U, F>(session: &Arc<Session<R>>, body: F) -> Result<Deferred<U>>
where
    R: Realizer,
    U: Clone + Send + Sync + 'static,
    F: FnOnce() -> U + Send + 'static,
{
    if !session.config().enabled {
        return Ok(Deferred::ready(body()));
    }

    session.ensure_slot()?;
    session
        .config()
        .tracer
        .coroutine_created(session.loom().current_depth() + 1);

    let seq = session.next_slot();
    let cell = Arc::new(SlotCell::new());
    let runner_cell = Arc::clone(&cell);
    let runner_session = Arc::downgrade(session);
    let outcome = session.loom().spawn(move || {
        let value = body();
        runner_cell.set(value);
        if let Some(session) = runner_session.upgrade() {
            session.release_slot(seq);
        }
    })?;

    match outcome {
        Spawned::Finished => {
            let value = cell
                .get()
                .ok_or_else(|| Error::runtime("evaluation finished without a value"))?;
            Ok(Deferred::ready(value))
        }
        Spawned::Suspended(_) => {
            let placeholder_session = Arc::downgrade(session);
            session.config().tracer.handle_created();
            Ok(Deferred::new(move || {
                let session = placeholder_session.upgrade().ok_or(Error::SessionClosed)?;
                let value = session.await_slot(seq, &cell)?;
                Ok(Step::Done(value))
            }))
        }
    }
}
