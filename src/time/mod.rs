//! Time services.
//!
//! The core has no built-in timeouts. A [`Timer`] is an outside
//! collaborator: it resolves promises from its own thread, and
//! [`Timer::timeout`] turns a late result into a
//! [`Timeout`](crate::ErrorKind::Timeout) failure.

pub mod timer;

pub use timer::Timer;
