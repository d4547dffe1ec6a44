//! Session configuration.

use std::fmt;
use std::sync::Arc;

use crate::trace::{NoopTracer, Tracer};

/// Configuration for one batching session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Whether batching is active. When false every defer realizes its
    /// single id synchronously and immediately — no handles suspend, no
    /// events accumulate. Useful as a kill switch and in tests that want
    /// straight-line behavior.
    pub enabled: bool,
    /// Soft bound on concurrently live coroutines. When a spawn would
    /// exceed it, pending events are realized first so suspended
    /// coroutines can finish and free slots.
    pub max_concurrent: usize,
    /// Observer for engine transitions.
    pub tracer: Arc<dyn Tracer>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: 64,
            tracer: Arc::new(NoopTracer),
        }
    }
}

impl SessionConfig {
    /// Enables or disables batching.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the coroutine bound. A bound of zero is treated as one.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Installs a tracer.
    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("enabled", &self.enabled)
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}
