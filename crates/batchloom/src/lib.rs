//! batchloom: transparent request batching for N+1-shaped workloads.
//!
//! Call sites ask for single values and get lazy handles back; the
//! engine merges every request that is pending during one unit of work
//! into grouped bulk fetches. Nothing about the call sites has to be
//! restructured into batch form — a handle resolves when forced, and by
//! then as many sibling requests as possible have been folded into the
//! same underlying fetch.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                    batchloom                      │
//! ├───────────────────────────────────────────────────┤
//! │  session/   - per-unit-of-work coordinator,       │
//! │               map/fold/evaluate drivers           │
//! │  scheduler/ - pending event registry + pop policy │
//! │  loom       - keyed suspend/resume coroutines     │
//! │  handle     - lazy handles with chain flattening  │
//! │  heap       - indexed heap behind the policy      │
//! │  realizer   - the batch-load collaborator trait   │
//! │  trace      - observation hooks                   │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use batchloom::{Fetched, Group, Realizer, Result, Session, SessionConfig};
//!
//! struct Users;
//!
//! impl Realizer for Users {
//!     type Id = u64;
//!     type GroupKey = ();
//!     type Value = String;
//!
//!     fn group_key(&self, _id: &u64) {}
//!
//!     fn call(&self, group: &Group<u64>) -> Result<HashMap<u64, Fetched<String>>> {
//!         // One round trip no matter how many call sites asked.
//!         Ok(group
//!             .iter()
//!             .map(|id| (*id, Fetched::Value(format!("user-{id}"))))
//!             .collect())
//!     }
//! }
//!
//! let session = Session::new(SessionConfig::default());
//! let users = session.register(Arc::new(Users));
//!
//! let names = session
//!     .map(vec![1u64, 2, 3], {
//!         let users = users.clone();
//!         move |id| users.load(id).unwrap().force().unwrap()
//!     })
//!     .unwrap();
//!
//! let names: Vec<_> = names.iter().map(|n| n.force().unwrap()).collect();
//! assert_eq!(names[0], Some("user-1".to_string()));
//! ```

pub mod error;
pub mod handle;
pub mod heap;
#[cfg(test)]
mod heap_proptest;
pub mod loom;
pub mod realizer;
pub mod scheduler;
pub mod session;
pub mod trace;

pub use error::{Error, Result};
pub use handle::{Deferred, Step};
pub use realizer::{Fetched, Group, Realizer, SourceId};
pub use scheduler::policy::{DepthPolicy, EventKey, EventPriority, Policy};
pub use scheduler::{Event, Target};
pub use session::{Resolution, Session, SessionConfig, Source};
pub use trace::{LogTracer, NoopTracer, Tracer};
