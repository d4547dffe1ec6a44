//! Tests for the session coordinator.
//!
//! Organized by functionality:
//! - Batching and merge semantics (session_tests)
//! - Concurrent enumeration: map / evaluate / fold (worker_tests)

mod mocks;
