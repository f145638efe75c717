//! `Future` bridge for promises.

use super::Promise;
use crate::error::Error;
use crate::types::{Outcome, Value};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

struct Slot<T> {
    outcome: Option<Outcome<T>>,
    waker: Option<Waker>,
}

/// Future that completes when a [`Promise`] resolves.
///
/// Created by `promise.into_future()` or by awaiting a promise. The listener
/// is registered on first poll.
///
/// # Cancel Safety
///
/// Dropping the future leaves the promise untouched; the registered listener
/// just finds nobody to wake.
pub struct PromiseFuture<T> {
    promise: Promise<T>,
    slot: Option<Arc<Mutex<Slot<T>>>>,
}

impl<T: Value> PromiseFuture<T> {
    pub(super) fn new(promise: Promise<T>) -> Self {
        Self {
            promise,
            slot: None,
        }
    }
}

impl<T: Value> Future for PromiseFuture<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.slot.is_none() {
            if let Some(outcome) = this.promise.outcome() {
                return Poll::Ready(outcome.force());
            }
            let slot = Arc::new(Mutex::new(Slot {
                outcome: None,
                waker: None,
            }));
            let filled = Arc::clone(&slot);
            this.promise.listen_sync(move |outcome| {
                let waker = {
                    let mut slot = filled.lock();
                    slot.outcome = Some(outcome);
                    slot.waker.take()
                };
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
            this.slot = Some(slot);
        }

        let Some(slot) = this.slot.as_ref() else {
            return Poll::Pending;
        };
        let mut slot = slot.lock();
        match slot.outcome.take() {
            Some(outcome) => Poll::Ready(outcome.force()),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> std::fmt::Debug for PromiseFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromiseFuture")
            .field("promise", &self.promise)
            .field("registered", &self.slot.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn ready_promise_completes_on_first_poll() {
        let value = futures_lite::future::block_on(Promise::success(3).into_future());
        assert_eq!(value.ok(), Some(3));
    }

    #[test]
    fn pending_promise_wakes_the_task() {
        let (promise, resolver) = Promise::<String>::create();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            resolver.success("late".to_string()).expect("resolve");
        });
        let value = futures_lite::future::block_on(promise.into_future());
        handle.join().expect("resolver thread");
        assert_eq!(value.ok().as_deref(), Some("late"));
    }

    #[test]
    fn failure_surfaces_as_err() {
        let (promise, resolver) = Promise::<u8>::create();
        drop(resolver);
        let err = futures_lite::future::block_on(promise.into_future()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResolverDropped);
    }
}
