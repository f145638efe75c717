//! Sequential composition and asynchronous loops.
//!
//! `a_seq(first).then_do(..).map(..).finally_do(..).finish()` runs each step
//! only after the previous one succeeded; the first failure skips the
//! remaining success steps and reaches the next `failed`/`listen` step or
//! the end of the chain.
//!
//! Loops iterate in place while their body resolves synchronously and
//! continue from a listener on the starting vat otherwise, so neither long
//! synchronous runs nor long asynchronous runs grow the stack.

use super::core::a_now;
use crate::error::Error;
use crate::promise::{Promise, Resolver};
use crate::runtime::Vat;
use crate::types::{Outcome, Value};
use parking_lot::Mutex;
use std::sync::Arc;

/// Starts a sequential flow with `first`, run immediately.
pub fn a_seq<T, F>(first: F) -> SeqBuilder<T>
where
    T: Value,
    F: FnOnce() -> Promise<T>,
{
    SeqBuilder {
        promise: a_now(first),
    }
}

/// Builder for a chain of sequential steps.
#[must_use = "a sequential flow does nothing observable until finished"]
pub struct SeqBuilder<T> {
    promise: Promise<T>,
}

impl<T: Value> SeqBuilder<T> {
    /// Continues with an asynchronous step after success.
    pub fn then_do<R, F>(self, step: F) -> SeqBuilder<R>
    where
        R: Value,
        F: FnOnce(T) -> Promise<R> + Send + 'static,
    {
        SeqBuilder {
            promise: self.promise.flat_map(step),
        }
    }

    /// Continues with a synchronous mapping after success.
    pub fn map<R, F>(self, step: F) -> SeqBuilder<R>
    where
        R: Value,
        F: FnOnce(T) -> R + Send + 'static,
    {
        SeqBuilder {
            promise: self.promise.map(step),
        }
    }

    /// Handles a failure of any previous step.
    pub fn failed<F>(self, handler: F) -> Self
    where
        F: FnOnce(Error) -> Promise<T> + Send + 'static,
    {
        Self {
            promise: self.promise.flat_map_failure(handler),
        }
    }

    /// Continues with the outcome of the previous step, success or failure.
    pub fn listen<R, F>(self, step: F) -> SeqBuilder<R>
    where
        R: Value,
        F: FnOnce(Outcome<T>) -> Promise<R> + Send + 'static,
    {
        SeqBuilder {
            promise: self.promise.flat_map_outcome(step),
        }
    }

    /// Runs `cleanup` exactly once after the previous steps, whatever their
    /// outcome.
    ///
    /// A failure of the previous steps wins over a cleanup failure, which is
    /// attached to it as suppressed. When the steps succeeded, a cleanup
    /// failure fails the flow.
    pub fn finally_do<F>(self, cleanup: F) -> Self
    where
        F: FnOnce() -> Promise<()> + Send + 'static,
    {
        let promise = self.promise.flat_map_outcome(move |outcome| {
            a_now(cleanup).flat_map_outcome(move |cleaned| merge_cleanup(outcome, cleaned))
        });
        Self { promise }
    }

    /// Ends the chain.
    pub fn finish(self) -> Promise<T> {
        self.promise
    }

    /// Adds a last asynchronous step and ends the chain.
    pub fn then_do_last<R, F>(self, step: F) -> Promise<R>
    where
        R: Value,
        F: FnOnce(T) -> Promise<R> + Send + 'static,
    {
        self.then_do(step).finish()
    }

    /// Adds a last synchronous mapping and ends the chain.
    pub fn map_last<R, F>(self, step: F) -> Promise<R>
    where
        R: Value,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.map(step).finish()
    }
}

pub(crate) fn merge_cleanup<T: Value>(outcome: Outcome<T>, cleaned: Outcome<()>) -> Promise<T> {
    match (outcome, cleaned) {
        (Outcome::Failure(mut error), Outcome::Failure(cleanup_error)) => {
            tracing::debug!(%cleanup_error, "cleanup failed after a failed body");
            error.add_suppressed(cleanup_error);
            Promise::failure(error)
        }
        (Outcome::Failure(error), Outcome::Success(())) => Promise::failure(error),
        (Outcome::Success(_), Outcome::Failure(cleanup_error)) => Promise::failure(cleanup_error),
        (Outcome::Success(value), Outcome::Success(())) => Promise::success(value),
    }
}

type LoopBody<T> = Box<dyn FnMut() -> Promise<Option<T>> + Send>;

struct Loop<T: Value> {
    body: Mutex<Option<LoopBody<T>>>,
    vat: Vat,
    resolver: Resolver<T>,
}

impl<T: Value> Loop<T> {
    fn iterate(self: Arc<Self>) {
        loop {
            let Some(mut body) = self.body.lock().take() else {
                return;
            };
            let step = a_now(&mut body);
            *self.body.lock() = Some(body);

            match step.outcome() {
                Some(Outcome::Success(None)) => {}
                Some(Outcome::Success(Some(value))) => {
                    self.finish(Outcome::Success(value));
                    return;
                }
                Some(Outcome::Failure(error)) => {
                    self.finish(Outcome::Failure(error));
                    return;
                }
                None => {
                    let this = Arc::clone(&self);
                    step.listen_on(&self.vat, move |outcome| match outcome {
                        Outcome::Success(None) => this.iterate(),
                        Outcome::Success(Some(value)) => this.finish(Outcome::Success(value)),
                        Outcome::Failure(error) => this.finish(Outcome::Failure(error)),
                    });
                    return;
                }
            }
        }
    }

    fn finish(&self, outcome: Outcome<T>) {
        // Drop the body first so captured state is released with the loop.
        self.body.lock().take();
        self.resolver.resolve_or_log(outcome);
    }
}

/// Repeats `body` until it yields `Some(value)`, then resolves with `value`.
///
/// A failed step ends the loop with that failure.
pub fn a_seq_until_value<T, F>(body: F) -> Promise<T>
where
    T: Value,
    F: FnMut() -> Promise<Option<T>> + Send + 'static,
{
    let (promise, resolver) = Promise::create();
    let state = Arc::new(Loop {
        body: Mutex::new(Some(Box::new(body))),
        vat: Vat::default_vat(),
        resolver,
    });
    state.iterate();
    promise
}

/// Repeats `body` while it yields `true`.
pub fn a_seq_while<F>(mut body: F) -> Promise<()>
where
    F: FnMut() -> Promise<bool> + Send + 'static,
{
    a_seq_until_value(move || body().map(|more| if more { None } else { Some(()) }))
}

/// Runs `body` for every item, one at a time.
pub fn a_seq_for_unit<I, F>(items: I, mut body: F) -> Promise<()>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    F: FnMut(I::Item) -> Promise<()> + Send + 'static,
{
    let mut items = items.into_iter();
    a_seq_while(move || match items.next() {
        Some(item) => body(item).then_value(true),
        None => Promise::success(false),
    })
}

/// Runs `body` for every item, one at a time, and collects the results in
/// item order.
pub fn a_seq_for_collect<I, R, F>(items: I, mut body: F) -> Promise<Vec<R>>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    R: Value,
    F: FnMut(I::Item) -> Promise<R> + Send + 'static,
{
    let mut items = items.into_iter();
    let collected: Arc<Mutex<Vec<R>>> = Arc::new(Mutex::new(Vec::new()));
    a_seq_until_value(move || match items.next() {
        Some(item) => {
            let collected = Arc::clone(&collected);
            body(item).map(move |value| {
                collected.lock().push(value);
                None
            })
        }
        None => Promise::success(Some(std::mem::take(&mut *collected.lock()))),
    })
}
