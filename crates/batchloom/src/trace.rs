//! Observation hooks for the batching engine.
//!
//! A [`Tracer`] is a pure observer: it sees every interesting transition
//! but has no control-flow effect. All hooks default to no-ops so
//! implementations only override what they care about.

use tracing::{debug, trace};

/// Engine lifecycle observer.
pub trait Tracer: Send + Sync {
    /// A batch was realized through its realizer.
    fn event_realized(&self, batch_size: usize) {
        let _ = batch_size;
    }

    /// A defer was answered straight from the session cache.
    fn value_cached(&self) {}

    /// A defer registered (or merged into) a pending event.
    fn value_deferred(&self) {}

    /// A realized value was written to the cache and released to waiters.
    fn value_dispatched(&self) {}

    /// A waiter obtained its value.
    fn value_realized(&self) {}

    /// A lazy handle was created.
    fn handle_created(&self) {}

    /// A lazy handle settled to its terminal value.
    fn handle_resolved(&self) {}

    /// A managed coroutine was spawned at the given nesting depth.
    fn coroutine_created(&self, depth: u32) {
        let _ = depth;
    }

    /// The current coroutine suspended on a target.
    fn coroutine_waited(&self) {}

    /// Waiters were resumed for a released target.
    fn coroutine_released(&self, count: usize) {
        let _ = count;
    }

    fn finalize_started(&self) {}

    /// One event was popped and realized during a drain.
    fn finalize_step(&self, batch_size: usize) {
        let _ = batch_size;
    }

    /// A drain finished with coroutines still suspended.
    fn finalize_deadlocked(&self, suspended: usize) {
        let _ = suspended;
    }
}

/// Tracer that observes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

/// Tracer that forwards every hook to the `tracing` subscriber, batches
/// and coroutine transitions at debug, per-value noise at trace.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn event_realized(&self, batch_size: usize) {
        debug!(batch_size, "event realized");
    }

    fn value_cached(&self) {
        trace!("defer served from cache");
    }

    fn value_deferred(&self) {
        trace!("value deferred");
    }

    fn value_dispatched(&self) {
        trace!("value dispatched");
    }

    fn value_realized(&self) {
        trace!("value realized");
    }

    fn handle_created(&self) {
        trace!("handle created");
    }

    fn handle_resolved(&self) {
        trace!("handle resolved");
    }

    fn coroutine_created(&self, depth: u32) {
        debug!(depth, "coroutine created");
    }

    fn coroutine_waited(&self) {
        trace!("coroutine waiting");
    }

    fn coroutine_released(&self, count: usize) {
        debug!(count, "coroutines released");
    }

    fn finalize_started(&self) {
        debug!("finalize started");
    }

    fn finalize_step(&self, batch_size: usize) {
        debug!(batch_size, "finalize step");
    }

    fn finalize_deadlocked(&self, suspended: usize) {
        debug!(suspended, "finalize deadlocked");
    }
}
