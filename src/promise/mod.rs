//! Single-assignment promises.
//!
//! A [`Promise`] is a read-only view of a result that will be produced later;
//! its [`Resolver`] is the capability to produce it. A promise starts
//! pending and moves to resolved exactly once. Listeners registered before
//! resolution are notified in registration order; listeners registered
//! after resolution are notified right away. Either way every listener is
//! notified exactly once.
//!
//! Notification never grows the stack without bound: resolutions that
//! trigger further resolutions on the same thread are queued on the
//! per-thread trampoline and run by the outermost call.
//!
//! # Listener flavors
//!
//! - [`listen_sync`](Promise::listen_sync) runs the listener on whichever
//!   thread resolves the promise. Use it only for short glue code.
//! - [`listen_on`](Promise::listen_on) schedules the listener on a vat, inside
//!   the [`Context`] that was current at registration time.
//! - [`listen`](Promise::listen) is `listen_on` with the default vat (the
//!   current vat, or the daemon vat off-vat).

mod future;

pub use future::PromiseFuture;

use crate::combinator::a_now;
use crate::context::Context;
use crate::error::{Error, ErrorKind};
use crate::runtime::{Vat, contain, trampoline};
use crate::types::{Outcome, Value};
use core::fmt;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

type Listener<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

/// Handle to a registered listener, used to [`forget`](Promise::forget) it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(u64);

impl ListenerKey {
    /// Key returned for listeners that were notified at registration time.
    pub const DETACHED: Self = Self(u64::MAX);
}

enum State<T> {
    Pending {
        listeners: SmallVec<[(u64, Listener<T>); 2]>,
        next_key: u64,
    },
    Resolved(Outcome<T>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
}

impl<T: Value> Shared<T> {
    fn pending() -> Self {
        Self {
            state: Mutex::new(State::Pending {
                listeners: SmallVec::new(),
                next_key: 0,
            }),
        }
    }

    fn complete(&self, outcome: Outcome<T>) -> Result<(), Error> {
        let listeners = {
            let mut state = self.state.lock();
            let listeners = match &mut *state {
                State::Resolved(_) => return Err(Error::double_resolution()),
                State::Pending { listeners, .. } => std::mem::take(listeners),
            };
            *state = State::Resolved(outcome.clone());
            listeners
        };
        if !listeners.is_empty() {
            trampoline(Box::new(move || notify_all(listeners, &outcome)));
        }
        Ok(())
    }
}

fn notify_all<T: Value>(listeners: SmallVec<[(u64, Listener<T>); 2]>, outcome: &Outcome<T>) {
    for (_, listener) in listeners {
        let outcome = outcome.clone();
        contain("promise listener", move || listener(outcome));
    }
}

/// A read-only handle to a value produced later.
///
/// Cloning a promise is cheap; clones observe the same resolution.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Value> Promise<T> {
    /// Creates a pending promise and its resolver.
    #[must_use]
    pub fn create() -> (Self, Resolver<T>) {
        let shared = Arc::new(Shared::pending());
        let resolver = Resolver {
            inner: Arc::new(ResolverInner {
                shared: Arc::clone(&shared),
            }),
        };
        (Self { shared }, resolver)
    }

    /// Creates an already resolved promise.
    #[must_use]
    pub fn resolved(outcome: Outcome<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Resolved(outcome)),
            }),
        }
    }

    /// Creates a promise resolved with a value.
    #[must_use]
    pub fn success(value: T) -> Self {
        Self::resolved(Outcome::Success(value))
    }

    /// Creates a promise resolved with a failure.
    #[must_use]
    pub fn failure(error: Error) -> Self {
        Self::resolved(Outcome::Failure(error))
    }

    /// Creates a promise that never resolves. It has no resolver.
    #[must_use]
    pub fn never() -> Self {
        Self {
            shared: Arc::new(Shared::pending()),
        }
    }

    /// Returns true once the promise is resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Resolved(_))
    }

    /// Returns a copy of the outcome if the promise is resolved.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome<T>> {
        match &*self.shared.state.lock() {
            State::Resolved(outcome) => Some(outcome.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Number of listeners waiting for resolution.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        match &*self.shared.state.lock() {
            State::Pending { listeners, .. } => listeners.len(),
            State::Resolved(_) => 0,
        }
    }

    /// Registers a listener that runs on the resolving thread.
    ///
    /// If the promise is already resolved the listener runs immediately on
    /// the calling thread (deferred if a notification is already running
    /// here). Returns a key for [`forget`](Self::forget).
    pub fn listen_sync<F>(&self, listener: F) -> ListenerKey
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Pending {
                    listeners,
                    next_key,
                } => {
                    let key = *next_key;
                    *next_key += 1;
                    listeners.push((key, Box::new(listener)));
                    return ListenerKey(key);
                }
                State::Resolved(outcome) => outcome.clone(),
            }
        };
        trampoline(Box::new(move || {
            contain("promise listener", move || listener(outcome));
        }));
        ListenerKey::DETACHED
    }

    /// Registers a listener that runs on `vat` inside the current context.
    pub fn listen_on<F>(&self, vat: &Vat, listener: F) -> ListenerKey
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let vat = vat.clone();
        let context = Context::current();
        self.listen_sync(move |outcome| {
            vat.execute(move || context.run(move || listener(outcome)));
        })
    }

    /// Registers a listener that runs on the default vat.
    pub fn listen<F>(&self, listener: F) -> ListenerKey
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        self.listen_on(&Vat::default_vat(), listener)
    }

    /// Removes a pending listener. Returns false if it already ran or the
    /// key is unknown.
    pub fn forget(&self, key: ListenerKey) -> bool {
        let mut state = self.shared.state.lock();
        match &mut *state {
            State::Pending { listeners, .. } => {
                let before = listeners.len();
                listeners.retain(|(k, _)| *k != key.0);
                listeners.len() != before
            }
            State::Resolved(_) => false,
        }
    }

    /// Resolves `resolver` with this promise's outcome once it is known.
    pub fn forward_to(&self, resolver: Resolver<T>) {
        if let Some(outcome) = self.outcome() {
            resolver.resolve_or_log(outcome);
            return;
        }
        self.listen_sync(move |outcome| resolver.resolve_or_log(outcome));
    }

    // === Chaining ===

    /// Runs `f` on `vat` with the outcome and adopts the promise it returns.
    ///
    /// A panic in `f` becomes a [`Panicked`](ErrorKind::Panicked) failure.
    /// When the promise is already resolved and `vat` is current, `f` runs
    /// immediately.
    pub fn flat_map_outcome_on<R, F>(&self, vat: &Vat, f: F) -> Promise<R>
    where
        R: Value,
        F: FnOnce(Outcome<T>) -> Promise<R> + Send + 'static,
    {
        if vat.is_current() {
            if let Some(outcome) = self.outcome() {
                return a_now(move || f(outcome));
            }
        }
        let (promise, resolver) = Promise::create();
        self.listen_on(vat, move |outcome| {
            a_now(move || f(outcome)).forward_to(resolver);
        });
        promise
    }

    /// [`flat_map_outcome_on`](Self::flat_map_outcome_on) on the default vat.
    pub fn flat_map_outcome<R, F>(&self, f: F) -> Promise<R>
    where
        R: Value,
        F: FnOnce(Outcome<T>) -> Promise<R> + Send + 'static,
    {
        self.flat_map_outcome_on(&Vat::default_vat(), f)
    }

    /// Maps the outcome to a new outcome.
    pub fn map_outcome<R, F>(&self, f: F) -> Promise<R>
    where
        R: Value,
        F: FnOnce(Outcome<T>) -> Outcome<R> + Send + 'static,
    {
        self.flat_map_outcome(move |outcome| Promise::resolved(f(outcome)))
    }

    /// Chains an asynchronous step on success; failures pass through.
    pub fn flat_map_on<R, F>(&self, vat: &Vat, f: F) -> Promise<R>
    where
        R: Value,
        F: FnOnce(T) -> Promise<R> + Send + 'static,
    {
        self.flat_map_outcome_on(vat, move |outcome| match outcome {
            Outcome::Success(value) => f(value),
            Outcome::Failure(error) => Promise::failure(error),
        })
    }

    /// [`flat_map_on`](Self::flat_map_on) on the default vat.
    pub fn flat_map<R, F>(&self, f: F) -> Promise<R>
    where
        R: Value,
        F: FnOnce(T) -> Promise<R> + Send + 'static,
    {
        self.flat_map_on(&Vat::default_vat(), f)
    }

    /// Maps the success value.
    pub fn map<R, F>(&self, f: F) -> Promise<R>
    where
        R: Value,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.flat_map(move |value| Promise::success(f(value)))
    }

    /// Maps the success value through a fallible function.
    pub fn try_map<R, F>(&self, f: F) -> Promise<R>
    where
        R: Value,
        F: FnOnce(T) -> Result<R, Error> + Send + 'static,
    {
        self.flat_map(move |value| Promise::resolved(f(value).into()))
    }

    /// Recovers from a failure with an asynchronous step.
    pub fn flat_map_failure<F>(&self, f: F) -> Self
    where
        F: FnOnce(Error) -> Self + Send + 'static,
    {
        self.flat_map_outcome(move |outcome| match outcome {
            Outcome::Success(value) => Promise::success(value),
            Outcome::Failure(error) => f(error),
        })
    }

    /// Recovers from a failure with a value.
    pub fn map_failure<F>(&self, f: F) -> Self
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        self.flat_map_failure(move |error| Promise::success(f(error)))
    }

    /// Replaces the success value.
    pub fn then_value<R: Value>(&self, value: R) -> Promise<R> {
        self.map(move |_| value)
    }

    /// Replaces the success value with the result of `f`.
    pub fn then_get<R, F>(&self, f: F) -> Promise<R>
    where
        R: Value,
        F: FnOnce() -> R + Send + 'static,
    {
        self.map(move |_| f())
    }

    /// Runs the next step after success, ignoring the value.
    pub fn then_flat_get<R, F>(&self, f: F) -> Promise<R>
    where
        R: Value,
        F: FnOnce() -> Promise<R> + Send + 'static,
    {
        self.flat_map(move |_| f())
    }

    /// Adopts `next` after success.
    pub fn then_promise<R: Value>(&self, next: Promise<R>) -> Promise<R> {
        self.flat_map(move |_| next)
    }

    /// Fails with `error` once this promise resolves. A failure of this
    /// promise is attached to `error` as suppressed.
    pub fn then_failure<R: Value>(&self, error: Error) -> Promise<R> {
        self.flat_map_outcome(move |outcome| {
            let mut error = error;
            if let Outcome::Failure(previous) = outcome {
                error.add_suppressed(previous);
            }
            Promise::failure(error)
        })
    }

    /// Discards the success value.
    pub fn to_void(&self) -> Promise<()> {
        self.map(|_| ())
    }

    /// Converts the outcome into a successful value.
    pub fn to_outcome_promise(&self) -> Promise<Outcome<T>> {
        self.map_outcome(Outcome::Success)
    }
}

impl<T: Value> std::future::IntoFuture for Promise<T> {
    type Output = Result<T, Error>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        PromiseFuture::new(self)
    }
}

impl<T: Value> From<Outcome<T>> for Promise<T> {
    fn from(outcome: Outcome<T>) -> Self {
        Self::resolved(outcome)
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.shared.state.lock() {
            State::Pending { listeners, .. } => format!("pending({} listeners)", listeners.len()),
            State::Resolved(Outcome::Success(_)) => "success".to_string(),
            State::Resolved(Outcome::Failure(error)) => format!("failure({error})"),
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

struct ResolverInner<T: Value> {
    shared: Arc<Shared<T>>,
}

impl<T: Value> Drop for ResolverInner<T> {
    fn drop(&mut self) {
        let abandoned = Outcome::Failure(Error::new(ErrorKind::ResolverDropped));
        if self.shared.complete(abandoned).is_ok() {
            tracing::debug!("promise failed: every resolver dropped before resolving");
        }
    }
}

/// The capability to resolve one [`Promise`].
///
/// Clones share the capability; the first resolution wins and later ones
/// return [`DoubleResolution`](ErrorKind::DoubleResolution). When the last
/// clone is dropped while the promise is still pending, the promise fails
/// with [`ResolverDropped`](ErrorKind::ResolverDropped).
pub struct Resolver<T: Value> {
    inner: Arc<ResolverInner<T>>,
}

impl<T: Value> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Value> Resolver<T> {
    /// Resolves the promise.
    pub fn resolve(&self, outcome: Outcome<T>) -> Result<(), Error> {
        self.inner.shared.complete(outcome)
    }

    /// Resolves the promise with a value.
    pub fn success(&self, value: T) -> Result<(), Error> {
        self.resolve(Outcome::Success(value))
    }

    /// Resolves the promise with a failure.
    pub fn failure(&self, error: Error) -> Result<(), Error> {
        self.resolve(Outcome::Failure(error))
    }

    /// Resolves the promise, logging instead of returning a double
    /// resolution. For glue code that forwards outcomes.
    pub fn resolve_or_log(&self, outcome: Outcome<T>) {
        if let Err(error) = self.resolve(outcome) {
            tracing::debug!(%error, "ignoring late resolution");
        }
    }

    /// Returns true once the promise is resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(*self.inner.shared.state.lock(), State::Resolved(_))
    }

    /// Returns the promise this resolver resolves.
    #[must_use]
    pub fn promise(&self) -> Promise<T> {
        Promise {
            shared: Arc::clone(&self.inner.shared),
        }
    }
}

impl<T: Value> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
