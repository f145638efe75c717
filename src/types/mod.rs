//! Core types for the Vatflow runtime.
//!
//! - [`outcome`]: Two-valued outcome of an asynchronous computation
//! - [`Value`]: Bound shared by every value that travels through a promise

pub mod outcome;

pub use outcome::Outcome;

/// A value that can be delivered through a [`Promise`](crate::Promise).
///
/// Every listener of a promise receives its own copy of the outcome, and
/// listeners may run on any vat, so values must be cloneable and sendable.
/// Share expensive payloads through `Arc`.
pub trait Value: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> Value for T {}
