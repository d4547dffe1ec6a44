//! Lazy value handles with chain flattening.
//!
//! A [`Deferred`] starts out holding a resolution procedure describing how
//! to obtain its value when something actually needs it. Forcing runs the
//! procedure once; the procedure may yield either a terminal value or
//! another handle, forming a chain. Once any handle in a chain is forced,
//! the terminal value is memoized onto every link that was walked, so
//! later reads are a single lookup and never re-run a procedure.
//!
//! Resolution is exposed through explicit accessors — [`Deferred::force`]
//! and the non-forcing [`Deferred::peek`] — rather than transparent
//! delegation.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;

/// Outcome of one resolution step: a terminal value, or a link to the
/// next handle in the chain.
pub enum Step<T> {
    Done(T),
    Chain(Deferred<T>),
}

type ResolveFn<T> = dyn Fn() -> Result<Step<T>> + Send + Sync;

enum State<T> {
    /// Not yet resolved. The procedure is `Fn`, not `FnOnce`: while one
    /// coroutine is suspended inside it, another may legally force the
    /// same handle and re-enter — the procedures used by the engine are
    /// idempotent (cache check first, then wait).
    Pending(Arc<ResolveFn<T>>),
    /// Resolved to another handle.
    Linked(Deferred<T>),
    /// Resolved to a terminal value.
    Ready(T),
}

/// A lazy, shareable reference to a value that may not exist yet.
pub struct Deferred<T> {
    inner: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Deferred<T> {
    /// Creates an unresolved handle from a resolution procedure.
    pub fn new<F>(resolve: F) -> Self
    where
        F: Fn() -> Result<Step<T>> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(State::Pending(Arc::new(resolve)))),
        }
    }

    /// Creates a handle that is already settled to `value`.
    pub fn ready(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State::Ready(value))),
        }
    }

    /// Creates a handle that is resolved to another handle.
    pub fn linked(next: Deferred<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State::Linked(next))),
        }
    }

    /// True once this handle holds a terminal value directly.
    pub fn is_ready(&self) -> bool {
        matches!(&*self.lock(), State::Ready(_))
    }

    /// True if forcing would run a resolution procedure (directly or
    /// somewhere down the chain).
    pub fn is_pending(&self) -> bool {
        let mut cur = self.clone();
        loop {
            let next = match &*cur.lock() {
                State::Pending(_) => return true,
                State::Ready(_) => return false,
                State::Linked(d) => d.clone(),
            };
            cur = next;
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: Clone> Deferred<T> {
    /// Resolves the handle, running resolution procedures as needed, and
    /// returns the terminal value. Every link walked is memoized to the
    /// terminal value, and settled links drop their procedures.
    pub fn force(&self) -> Result<T> {
        let mut trail: Vec<Deferred<T>> = Vec::new();
        let mut cur = self.clone();
        let value = loop {
            enum Action<T> {
                Value(T),
                Follow(Deferred<T>),
                Call(Arc<ResolveFn<T>>),
            }
            let action = match &*cur.lock() {
                State::Ready(v) => Action::Value(v.clone()),
                State::Linked(d) => Action::Follow(d.clone()),
                State::Pending(f) => Action::Call(Arc::clone(f)),
            };
            match action {
                Action::Value(v) => break v,
                Action::Follow(next) => {
                    trail.push(cur);
                    cur = next;
                }
                Action::Call(resolve) => {
                    // The procedure may suspend the current coroutine, so
                    // no handle lock can be held across this call.
                    let step = resolve()?;
                    let mut state = cur.lock();
                    if matches!(&*state, State::Pending(_)) {
                        *state = match step {
                            Step::Done(v) => State::Ready(v),
                            Step::Chain(d) => State::Linked(d),
                        };
                    }
                    // Re-read `cur` on the next iteration.
                }
            }
        };
        for link in trail {
            *link.lock() = State::Ready(value.clone());
        }
        Ok(value)
    }

    /// Non-forcing read: returns the value if this handle — or the chain
    /// it links to — has already been resolved, without running any
    /// resolution procedure. Links walked to an already-resolved terminal
    /// are memoized just as `force` would.
    pub fn peek(&self) -> Option<T> {
        let mut trail: Vec<Deferred<T>> = Vec::new();
        let mut cur = self.clone();
        let value = loop {
            let next = match &*cur.lock() {
                State::Ready(v) => break v.clone(),
                State::Pending(_) => return None,
                State::Linked(d) => d.clone(),
            };
            trail.push(cur);
            cur = next;
        };
        for link in trail {
            *link.lock() = State::Ready(value.clone());
        }
        Some(value)
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match &*self.lock() {
            State::Pending(_) => "pending",
            State::Linked(_) => "linked",
            State::Ready(_) => "ready",
        };
        f.debug_struct("Deferred").field("state", &tag).finish()
    }
}
