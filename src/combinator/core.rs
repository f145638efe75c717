//! Elementary flows: constant promises, immediate and deferred execution,
//! and one-way sends.

use crate::error::Error;
use crate::promise::{Promise, Resolver};
use crate::runtime::{Vat, daemon_pool};
use crate::types::{Outcome, Value};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// A promise resolved with `value`.
pub fn a_value<T: Value>(value: T) -> Promise<T> {
    Promise::success(value)
}

/// A promise resolved with `()`.
pub fn a_void() -> Promise<()> {
    Promise::success(())
}

/// A promise resolved with `true`.
pub fn a_true() -> Promise<bool> {
    Promise::success(true)
}

/// A promise resolved with `false`.
pub fn a_false() -> Promise<bool> {
    Promise::success(false)
}

/// A promise resolved with `value`.
pub fn a_bool(value: bool) -> Promise<bool> {
    Promise::success(value)
}

/// A promise resolved with `Some(value)`.
pub fn a_some<T: Value>(value: T) -> Promise<Option<T>> {
    Promise::success(Some(value))
}

/// A promise resolved with `None`.
pub fn a_none<T: Value>() -> Promise<Option<T>> {
    Promise::success(None)
}

/// A promise failed with `error`.
pub fn a_failure<T: Value>(error: Error) -> Promise<T> {
    Promise::failure(error)
}

/// A promise resolved with `outcome`.
pub fn a_outcome<T: Value>(outcome: Outcome<T>) -> Promise<T> {
    Promise::resolved(outcome)
}

/// A promise that never resolves.
pub fn a_never<T: Value>() -> Promise<T> {
    Promise::never()
}

/// Creates a promise and hands its resolver to `body`.
///
/// A panic in `body` fails the promise unless `body` already resolved it.
pub fn a_resolver<T, F>(body: F) -> Promise<T>
where
    T: Value,
    F: FnOnce(Resolver<T>),
{
    let (promise, resolver) = Promise::create();
    let fallback = resolver.clone();
    if let Err(payload) = catch_unwind(AssertUnwindSafe(move || body(resolver))) {
        let _ = fallback.failure(Error::panicked(&*payload));
    }
    promise
}

/// Runs `body` now, on the calling thread.
///
/// A panic in `body` becomes a failed promise.
pub fn a_now<T, F>(body: F) -> Promise<T>
where
    T: Value,
    F: FnOnce() -> Promise<T>,
{
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(promise) => promise,
        Err(payload) => Promise::failure(Error::panicked(&*payload)),
    }
}

/// Runs `body` later, on `vat`.
pub fn a_later<T, F>(vat: &Vat, body: F) -> Promise<T>
where
    T: Value,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    let (promise, resolver) = Promise::create();
    vat.execute(move || a_now(body).forward_to(resolver));
    promise
}

/// Runs `body` later, on the default vat.
pub fn a_later_default<T, F>(body: F) -> Promise<T>
where
    T: Value,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    a_later(&Vat::default_vat(), body)
}

/// Sends `body` to `vat` and resolves, on the caller's default vat, with its
/// result.
pub fn a_send<T, F>(vat: &Vat, body: F) -> Promise<T>
where
    T: Value,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    let reply = Vat::default_vat();
    let (promise, resolver) = Promise::create();
    a_later(vat, body).listen_on(&reply, move |outcome| resolver.resolve_or_log(outcome));
    promise
}

/// Runs `action` on `vat` without waiting for a result. A failure is logged.
pub fn a_one_way<F>(vat: &Vat, action: F)
where
    F: FnOnce() -> Result<(), Error> + Send + 'static,
{
    let target = vat.id();
    vat.execute(move || match catch_unwind(AssertUnwindSafe(action)) {
        Ok(Ok(())) => {}
        Ok(Err(error)) => tracing::error!(vat = %target, %error, "one-way action failed"),
        Err(payload) => {
            let error = Error::panicked(&*payload);
            tracing::error!(vat = %target, %error, "one-way action panicked");
        }
    });
}

/// Runs a blocking function on the daemon pool, outside any vat.
pub fn a_daemon_get<T, F>(f: F) -> Promise<T>
where
    T: Value,
    F: FnOnce() -> T + Send + 'static,
{
    let (promise, resolver) = Promise::create();
    daemon_pool().spawn(Box::new(move || {
        let outcome = match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Outcome::Success(value),
            Err(payload) => Outcome::from_panic(&*payload),
        };
        resolver.resolve_or_log(outcome);
    }));
    promise
}
