//! Closeable resources and scopes that always release them.
//!
//! A resource scope is the asynchronous counterpart of nested `Drop`
//! scopes: `a_try(open).run(body)` opens the resource, runs `body` with it,
//! and closes it on every exit path. Up to three resources can be opened in
//! one scope with `and_chain`/`and_other`; each is opened only after the
//! previous one succeeded and they are closed in reverse order, including
//! when a later open fails.
//!
//! # Failure precedence
//!
//! A body failure wins. A close failure that happens after a body failure is
//! attached to it as suppressed; a close failure after a successful body
//! fails the scope with [`CloseFailed`](ErrorKind::CloseFailed).

use super::core::{a_later, a_now, a_value};
use super::seq::a_seq;
use crate::error::{Error, ErrorKind};
use crate::promise::{Promise, Resolver};
use crate::runtime::Vat;
use crate::types::Value;
use parking_lot::Mutex;
use std::sync::Arc;

/// A resource with an asynchronous, possibly failing close.
///
/// Closing must be idempotent, and operations outstanding when the resource
/// closes must resolve (usually with a
/// [`ResourceClosed`](ErrorKind::ResourceClosed) failure) rather than hang.
pub trait AsyncCloseable: Send + Sync + 'static {
    /// Starts closing the resource. The promise resolves once it is closed.
    fn close(&self) -> Promise<()>;
}

impl<C: AsyncCloseable + ?Sized> AsyncCloseable for Arc<C> {
    fn close(&self) -> Promise<()> {
        (**self).close()
    }
}

fn close_now<R: AsyncCloseable>(resource: &R) -> Promise<()> {
    a_now(|| resource.close()).map_outcome(|outcome| {
        outcome.map_err(|error| {
            if error.kind() == ErrorKind::CloseFailed {
                error
            } else {
                let message = error.to_string();
                Error::new(ErrorKind::CloseFailed)
                    .with_message(message)
                    .with_source(error)
            }
        })
    })
}

/// Closes `resource` on `vat`.
pub fn close_resource<R: AsyncCloseable>(vat: &Vat, resource: R) -> Promise<()> {
    a_later(vat, move || close_now(&resource))
}

fn scoped<R, T, F>(resource: R, body: F) -> Promise<T>
where
    R: AsyncCloseable + Value,
    T: Value,
    F: FnOnce(R) -> Promise<T> + Send + 'static,
{
    let held = resource.clone();
    a_seq(move || body(resource))
        .finally_do(move || close_now(&held))
        .finish()
}

type Open<R> = Box<dyn FnOnce() -> Promise<R> + Send>;

/// Opens a resource scope.
pub fn a_try<R, F>(open: F) -> Try1<R>
where
    R: AsyncCloseable + Value,
    F: FnOnce() -> Promise<R> + Send + 'static,
{
    Try1 {
        open: Box::new(open),
    }
}

/// Opens a resource scope over an already open resource.
pub fn a_try_resource<R>(resource: R) -> Try1<R>
where
    R: AsyncCloseable + Value,
{
    a_try(move || a_value(resource))
}

/// Opens a resource scope over a resource that is being opened.
pub fn a_try_promise<R>(opening: Promise<R>) -> Try1<R>
where
    R: AsyncCloseable + Value,
{
    a_try(move || opening)
}

/// Scope over one resource.
#[must_use = "a scope opens nothing until run"]
pub struct Try1<R> {
    open: Open<R>,
}

impl<R: AsyncCloseable + Value> Try1<R> {
    /// Opens the resource, runs `body`, and closes the resource.
    pub fn run<T, F>(self, body: F) -> Promise<T>
    where
        T: Value,
        F: FnOnce(R) -> Promise<T> + Send + 'static,
    {
        a_now(self.open).flat_map(move |resource| scoped(resource, body))
    }

    /// Opens a second resource from the first.
    pub fn and_chain<R2, F>(self, open: F) -> Try2<R, R2>
    where
        R2: AsyncCloseable + Value,
        F: FnOnce(R) -> Promise<R2> + Send + 'static,
    {
        Try2 {
            first: self,
            open: Box::new(open),
        }
    }

    /// Opens a second, independent resource.
    pub fn and_other<R2, F>(self, open: F) -> Try2<R, R2>
    where
        R2: AsyncCloseable + Value,
        F: FnOnce() -> Promise<R2> + Send + 'static,
    {
        self.and_chain(move |_| open())
    }
}

/// Scope over two resources.
#[must_use = "a scope opens nothing until run"]
pub struct Try2<R1, R2> {
    first: Try1<R1>,
    open: Box<dyn FnOnce(R1) -> Promise<R2> + Send>,
}

impl<R1, R2> Try2<R1, R2>
where
    R1: AsyncCloseable + Value,
    R2: AsyncCloseable + Value,
{
    /// Opens both resources, runs `body`, and closes them in reverse order.
    pub fn run<T, F>(self, body: F) -> Promise<T>
    where
        T: Value,
        F: FnOnce(R1, R2) -> Promise<T> + Send + 'static,
    {
        let open = self.open;
        self.first.run(move |r1| {
            let source = r1.clone();
            a_now(move || open(source)).flat_map(move |r2| scoped(r2, move |r2| body(r1, r2)))
        })
    }

    /// Opens a third resource from the first two.
    pub fn and_chain<R3, F>(self, open: F) -> Try3<R1, R2, R3>
    where
        R3: AsyncCloseable + Value,
        F: FnOnce(R1, R2) -> Promise<R3> + Send + 'static,
    {
        Try3 {
            first: self,
            open: Box::new(open),
        }
    }

    /// Opens a third, independent resource.
    pub fn and_other<R3, F>(self, open: F) -> Try3<R1, R2, R3>
    where
        R3: AsyncCloseable + Value,
        F: FnOnce() -> Promise<R3> + Send + 'static,
    {
        self.and_chain(move |_, _| open())
    }
}

/// Scope over three resources.
#[must_use = "a scope opens nothing until run"]
pub struct Try3<R1, R2, R3> {
    first: Try2<R1, R2>,
    open: Box<dyn FnOnce(R1, R2) -> Promise<R3> + Send>,
}

impl<R1, R2, R3> Try3<R1, R2, R3>
where
    R1: AsyncCloseable + Value,
    R2: AsyncCloseable + Value,
    R3: AsyncCloseable + Value,
{
    /// Opens all three resources, runs `body`, and closes them in reverse
    /// order.
    pub fn run<T, F>(self, body: F) -> Promise<T>
    where
        T: Value,
        F: FnOnce(R1, R2, R3) -> Promise<T> + Send + 'static,
    {
        let open = self.open;
        self.first.run(move |r1, r2| {
            let (s1, s2) = (r1.clone(), r2.clone());
            a_now(move || open(s1, s2))
                .flat_map(move |r3| scoped(r3, move |r3| body(r1, r2, r3)))
        })
    }
}

struct CloseFlags {
    closing: bool,
    invalidation: Option<Error>,
}

struct CloseInner {
    flags: Mutex<CloseFlags>,
    closed: Promise<()>,
    resolver: Resolver<()>,
}

/// Close bookkeeping for resource implementations.
///
/// Tracks whether the resource is open, closing, or closed, makes close
/// idempotent, and remembers the first failure that invalidated the
/// resource.
#[derive(Clone)]
pub struct CloseState {
    inner: Arc<CloseInner>,
}

impl Default for CloseState {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseState {
    /// Creates the state of an open resource.
    #[must_use]
    pub fn new() -> Self {
        let (closed, resolver) = Promise::create();
        Self {
            inner: Arc::new(CloseInner {
                flags: Mutex::new(CloseFlags {
                    closing: false,
                    invalidation: None,
                }),
                closed,
                resolver,
            }),
        }
    }

    /// Starts closing with `action` unless closing already started, and
    /// returns the promise of the close.
    pub fn close_with<F>(&self, action: F) -> Promise<()>
    where
        F: FnOnce() -> Promise<()>,
    {
        let first = {
            let mut flags = self.inner.flags.lock();
            !std::mem::replace(&mut flags.closing, true)
        };
        if first {
            a_now(action).forward_to(self.inner.resolver.clone());
        }
        self.inner.closed.clone()
    }

    /// Promise resolved once closing finished.
    #[must_use]
    pub fn closed(&self) -> Promise<()> {
        self.inner.closed.clone()
    }

    /// Returns true until closing starts.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.inner.flags.lock().closing
    }

    /// Returns true once closing finished.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_resolved()
    }

    /// Records the failure that made the resource unusable. Only the first
    /// one is kept; returns false for later ones.
    pub fn invalidate(&self, error: Error) -> bool {
        let mut flags = self.inner.flags.lock();
        if flags.invalidation.is_some() {
            return false;
        }
        tracing::debug!(%error, "resource invalidated");
        flags.invalidation = Some(error);
        true
    }

    /// The failure recorded by [`invalidate`](Self::invalidate).
    #[must_use]
    pub fn invalidation(&self) -> Option<Error> {
        self.inner.flags.lock().invalidation.clone()
    }

    /// Fails with [`ResourceClosed`](ErrorKind::ResourceClosed) once closing
    /// started.
    pub fn ensure_open(&self) -> Result<(), Error> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::resource_closed())
        }
    }

    /// Fails with the invalidation failure, or as [`ensure_open`](Self::ensure_open).
    pub fn ensure_valid_and_open(&self) -> Result<(), Error> {
        if let Some(error) = self.invalidation() {
            return Err(error);
        }
        self.ensure_open()
    }

    /// A failed promise when the resource is invalid or closing, for
    /// operations that must not start.
    #[must_use]
    pub fn invalidation_promise<T: Value>(&self) -> Option<Promise<T>> {
        self.ensure_valid_and_open().err().map(Promise::failure)
    }
}

impl std::fmt::Debug for CloseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseState")
            .field("open", &self.is_open())
            .field("closed", &self.is_closed())
            .field("invalidation", &self.invalidation())
            .finish()
    }
}
