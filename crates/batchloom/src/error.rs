//! Error types for the batching engine.

use thiserror::Error;

use crate::realizer::SourceId;

/// Errors surfaced by sessions, handles, and realizers.
#[derive(Debug, Error)]
pub enum Error {
    /// Coroutines remain suspended but no pending event can ever release
    /// them. Raised by `Session::finalize` after the drain loop empties
    /// the scheduler.
    #[error("deadlock: {suspended} coroutine(s) suspended with no realizable event left")]
    Deadlock { suspended: usize },

    /// A `SourceId` that was never registered with the session.
    #[error("unknown source {source_id}: realizer was not registered with this session")]
    UnknownSource { source_id: SourceId },

    /// An unmanaged force of a target that is neither cached nor pending,
    /// and that no remaining event can resolve.
    #[error("unresolvable target {target}: it was never registered with the scheduler")]
    UnresolvedTarget { target: String },

    /// The handle outlived its session; there is nothing left to resolve
    /// against.
    #[error("session has been dropped; handle can no longer be resolved")]
    SessionClosed,

    /// A realizer's bulk fetch failed. The failed event is consumed; the
    /// remaining registry is left intact.
    #[error("realize failed: {message}")]
    Realize { message: String },

    /// Internal coroutine-runtime failure (thread spawn, control-channel
    /// protocol violation).
    #[error("coroutine runtime error: {message}")]
    Runtime { message: String },
}

impl Error {
    /// Shorthand for realizer-side failures.
    pub fn realize(message: impl Into<String>) -> Self {
        Error::Realize {
            message: message.into(),
        }
    }

    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime {
            message: message.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
