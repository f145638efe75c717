//! Single-consumer stream skeleton.
//!
//! [`StreamBase`] turns a produce function into an [`AsyncStream`] with the
//! standard bookkeeping:
//!
//! - overlapping reads fail with `ConcurrentRead`
//! - after end-of-stream, reads keep returning `None` and the stream closes
//! - a failed read invalidates and closes the stream; later reads fail with
//!   the same error
//! - close runs the close function once

use super::stream::AsyncStream;
use crate::combinator::{AsyncCloseable, CloseState, a_now, a_void};
use crate::error::Error;
use crate::promise::Promise;
use crate::types::{Outcome, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type Produce<T> = Box<dyn Fn() -> Promise<Option<T>> + Send + Sync>;
type OnClose = Box<dyn FnOnce() -> Promise<()> + Send>;

struct BaseCore<T> {
    produce: Produce<T>,
    on_close: Mutex<Option<OnClose>>,
    reading: AtomicBool,
    ended: AtomicBool,
    state: CloseState,
}

/// A stream built from a produce function. Clones share the stream.
pub struct StreamBase<T> {
    core: Arc<BaseCore<T>>,
}

impl<T> Clone for StreamBase<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Value> StreamBase<T> {
    /// Creates a stream that reads with `produce` and has nothing to release.
    pub fn new<P>(produce: P) -> Self
    where
        P: Fn() -> Promise<Option<T>> + Send + Sync + 'static,
    {
        Self::with_close(produce, a_void)
    }

    /// Creates a stream that reads with `produce` and releases with
    /// `on_close`.
    ///
    /// `produce` is never called concurrently with itself.
    pub fn with_close<P, C>(produce: P, on_close: C) -> Self
    where
        P: Fn() -> Promise<Option<T>> + Send + Sync + 'static,
        C: FnOnce() -> Promise<()> + Send + 'static,
    {
        Self {
            core: Arc::new(BaseCore {
                produce: Box::new(produce),
                on_close: Mutex::new(Some(Box::new(on_close))),
                reading: AtomicBool::new(false),
                ended: AtomicBool::new(false),
                state: CloseState::new(),
            }),
        }
    }

    /// The close bookkeeping of this stream.
    pub fn close_state(&self) -> &CloseState {
        &self.core.state
    }

    fn settle(&self, outcome: &Outcome<Option<T>>) {
        self.core.reading.store(false, Ordering::Release);
        match outcome {
            Outcome::Success(Some(_)) => {}
            Outcome::Success(None) => {
                self.core.ended.store(true, Ordering::Release);
                let _ = self.close();
            }
            Outcome::Failure(error) => {
                self.core.state.invalidate(error.clone());
                let _ = self.close();
            }
        }
    }
}

impl<T: Value> AsyncCloseable for StreamBase<T> {
    fn close(&self) -> Promise<()> {
        let on_close = self.core.on_close.lock().take();
        self.core
            .state
            .close_with(move || on_close.map_or_else(a_void, |close| close()))
    }
}

impl<T: Value> AsyncStream<T> for StreamBase<T> {
    fn next(&self) -> Promise<Option<T>> {
        if self.core.ended.load(Ordering::Acquire) {
            return Promise::success(None);
        }
        if let Some(rejected) = self.core.state.invalidation_promise() {
            return rejected;
        }
        if self.core.reading.swap(true, Ordering::AcqRel) {
            return Promise::failure(Error::concurrent_read());
        }
        let produced = a_now(|| (self.core.produce)());
        if let Some(outcome) = produced.outcome() {
            self.settle(&outcome);
            return Promise::resolved(outcome);
        }
        let (promise, resolver) = Promise::create();
        let this = self.clone();
        produced.listen_sync(move |outcome| {
            this.settle(&outcome);
            resolver.resolve_or_log(outcome);
        });
        promise
    }
}

impl<T> std::fmt::Debug for StreamBase<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBase")
            .field("reading", &self.core.reading.load(Ordering::Relaxed))
            .field("ended", &self.core.ended.load(Ordering::Relaxed))
            .field("state", &self.core.state)
            .finish()
    }
}
