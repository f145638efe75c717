//! Admission primitives for asynchronous flows.
//!
//! - [`RequestQueue`]: at most one action in flight, started in submission order
//! - [`Semaphore`]: multi-permit admission with a strict head-of-line policy
//!
//! Neither primitive blocks a thread: waiting is a pending promise.

pub mod request_queue;
pub mod semaphore;

pub use request_queue::RequestQueue;
pub use semaphore::{AsyncSemaphore, ExportedSemaphore, Semaphore};
