//! Vatflow: a promise-and-vat runtime for asynchronous, event-driven programs.
//!
//! # Overview
//!
//! Vatflow runs callback-based computations on *vats*: serial executors that
//! guarantee at most one action runs at a time per vat. Computations exchange
//! results through single-assignment [`Promise`]s resolved by [`Resolver`]s.
//! Continuations always run on the vat of whoever registered them, inside the
//! ambient [`Context`] that was current when they were registered.
//!
//! # Core Guarantees
//!
//! - **Serial vats**: no two actions of the same vat ever overlap
//! - **Single assignment**: a promise resolves once; a second resolution is a usage error
//! - **No lost listeners**: every listener is notified exactly once, with bounded stack depth
//! - **Context hops with the continuation**: ambient state is restored after each dispatch
//! - **Scoped resources**: acquired resources are released in reverse order
//! - **Backpressure**: pull streams read on demand; `window(n)` bounds the work in flight
//!
//! # Module Structure
//!
//! - [`types`]: Outcome and the value bound shared by every promise
//! - [`error`](mod@error): Error kinds, categories, and the cloneable [`Error`]
//! - [`promise`]: [`Promise`], [`Resolver`], and the `Future` bridge
//! - [`runtime`]: Vats, the daemon pool, `block_on`, and runtime configuration
//! - [`context`]: Immutable ambient context and active entries
//! - [`observability`]: Diagnostic tag and tracing-span entries for [`Context`]
//! - [`sync`]: FIFO request queue and strict head-of-line semaphore
//! - [`combinator`]: Sequential, parallel, any-of, and resource-scope flows
//! - [`stream`]: Pull streams, sinks, rendezvous queues, and pipelining
//! - [`time`]: Timer collaborator for sleeps and timeouts

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod combinator;
pub mod context;
pub mod error;
pub mod observability;
pub mod promise;
pub mod runtime;
pub mod stream;
pub mod sync;
pub mod time;
pub mod types;

// ── Test-only modules ───────────────────────────────────────────────────
#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

// Re-exports for convenient access to core types
pub use combinator::{
    AllBuilder, AnyBuilder, AsyncCloseable, CloseState, SeqBuilder, a_all, a_any,
    a_any_prefer_success, a_failure, a_later, a_never, a_now, a_one_way, a_par, a_resolver,
    a_send, a_seq, a_seq_until_value, a_seq_while, a_try, a_value, a_void,
};
pub use context::{ActiveEntry, Context, ContextGuard, ContextKey, Restore, in_context};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use promise::{ListenerKey, Promise, PromiseFuture, Resolver};
pub use runtime::{
    RuntimeConfig, SingleThreadVat, Vat, VatBackend, VatGuard, VatId, block_on,
    block_on_outcome, daemon_vat,
};
pub use stream::{AsyncSink, AsyncStream, PullStreamBuilder, PushStreamBuilder};
pub use sync::{AsyncSemaphore, RequestQueue, Semaphore};
pub use time::Timer;
pub use types::{Outcome, Value};
