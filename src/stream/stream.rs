//! The pull stream and push sink traits.
//!
//! # Cancel Safety
//!
//! Closing a stream while a read is outstanding makes that read resolve:
//! with end-of-stream, with the element it was about to return, or with a
//! failure. It never hangs.

use crate::combinator::AsyncCloseable;
use crate::error::Error;
use crate::promise::Promise;
use crate::types::Value;
use std::sync::Arc;

/// Asynchronous pull stream.
///
/// [`next`](Self::next) resolves with `Some(item)`, or with `None` once the
/// stream ended. Streams are single-consumer: unless
/// [`supports_pipelining`](Self::supports_pipelining) is true, calling
/// `next` again before the previous read resolved fails with
/// [`ConcurrentRead`](crate::ErrorKind::ConcurrentRead).
///
/// A stream that ended or failed closes itself. A consumer that stops early
/// must close it.
pub trait AsyncStream<T: Value>: AsyncCloseable {
    /// Reads the next element.
    fn next(&self) -> Promise<Option<T>>;

    /// Returns true if overlapping `next` calls are allowed and answered in
    /// call order.
    fn supports_pipelining(&self) -> bool {
        false
    }
}

/// Asynchronous push sink.
pub trait AsyncSink<T: Value>: AsyncCloseable {
    /// Offers an element. The promise resolves once the sink accepted it,
    /// which is how a sink applies backpressure.
    fn put(&self, value: T) -> Promise<()>;

    /// Ends the sequence with a failure instead of a normal close.
    fn fail(&self, error: Error) -> Promise<()>;

    /// Resolves once the reading side consumed everything and closed.
    fn finished(&self) -> Promise<()>;
}

/// Shared handle to a stream.
pub type SharedStream<T> = Arc<dyn AsyncStream<T>>;

/// Shared handle to a sink.
pub type SharedSink<T> = Arc<dyn AsyncSink<T>>;

impl<T: Value, S: AsyncStream<T> + ?Sized> AsyncStream<T> for Arc<S> {
    fn next(&self) -> Promise<Option<T>> {
        (**self).next()
    }

    fn supports_pipelining(&self) -> bool {
        (**self).supports_pipelining()
    }
}

impl<T: Value, S: AsyncSink<T> + ?Sized> AsyncSink<T> for Arc<S> {
    fn put(&self, value: T) -> Promise<()> {
        (**self).put(value)
    }

    fn fail(&self, error: Error) -> Promise<()> {
        (**self).fail(error)
    }

    fn finished(&self) -> Promise<()> {
        (**self).finished()
    }
}
