//! Multi-permit asynchronous semaphore.
//!
//! A semaphore controls access to a finite number of resources through
//! permits. [`acquire`](Semaphore::acquire) returns a promise that resolves
//! once the permits are granted; [`release`](Semaphore::release) hands them
//! back.
//!
//! # Admission policy
//!
//! Requests are granted strictly in arrival order. A request that wants more
//! permits than are currently available blocks every later request, even
//! smaller ones that would fit: a 1-permit acquire issued after a pending
//! 3-permit acquire never completes before it.
//!
//! # Example
//!
//! ```
//! use vatflow::{Semaphore, block_on};
//!
//! let sem = Semaphore::new(2);
//! let value = block_on(move || sem.run(|| vatflow::a_value(7))).unwrap();
//! assert_eq!(value, 7);
//! ```

use crate::combinator::{a_later, a_now, a_one_way};
use crate::error::Error;
use crate::promise::{Promise, Resolver};
use crate::runtime::Vat;
use crate::types::{Outcome, Value};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Capability interface of a semaphore, implemented by [`Semaphore`] and by
/// the vat-bound proxy returned by [`Semaphore::export`].
pub trait AsyncSemaphore: Send + Sync + 'static {
    /// Acquires `permits` permits.
    fn acquire(&self, permits: usize) -> Promise<()>;

    /// Releases `permits` permits.
    fn release(&self, permits: usize);
}

struct SemaphoreState {
    permits: usize,
    pending: VecDeque<(usize, Resolver<()>)>,
}

/// FIFO multi-permit semaphore. Clones share the permits.
#[derive(Clone)]
pub struct Semaphore {
    state: Arc<Mutex<SemaphoreState>>,
}

impl Semaphore {
    /// Creates a semaphore with `permits` available permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SemaphoreState {
                permits,
                pending: VecDeque::new(),
            })),
        }
    }

    /// Currently available permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.state.lock().permits
    }

    /// Number of acquires waiting for permits.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Acquires `permits` permits.
    ///
    /// Resolves immediately when nobody is waiting and enough permits are
    /// available; otherwise queues behind earlier requests. Asking for zero
    /// permits fails with [`InvalidArgument`](crate::ErrorKind::InvalidArgument).
    pub fn acquire(&self, permits: usize) -> Promise<()> {
        if permits == 0 {
            return Promise::failure(Error::invalid_argument("acquire of zero permits"));
        }
        let mut state = self.state.lock();
        if state.pending.is_empty() && state.permits >= permits {
            state.permits -= permits;
            return Promise::success(());
        }
        let (promise, resolver) = Promise::create();
        state.pending.push_back((permits, resolver));
        tracing::trace!(
            permits,
            available = state.permits,
            waiting = state.pending.len(),
            "semaphore acquire queued"
        );
        promise
    }

    /// Acquires `permits` permits if that can be done right now.
    pub fn try_acquire(&self, permits: usize) -> bool {
        let mut state = self.state.lock();
        if permits > 0 && state.pending.is_empty() && state.permits >= permits {
            state.permits -= permits;
            true
        } else {
            false
        }
    }

    /// Releases `permits` permits and grants waiting requests in order while
    /// the request at the head fits.
    pub fn release(&self, permits: usize) {
        let granted = {
            let mut state = self.state.lock();
            state.permits += permits;
            let mut granted = Vec::new();
            while let Some((wanted, _)) = state.pending.front() {
                if *wanted > state.permits {
                    break;
                }
                let wanted = *wanted;
                state.permits -= wanted;
                if let Some((_, resolver)) = state.pending.pop_front() {
                    granted.push(resolver);
                }
            }
            granted
        };
        for resolver in granted {
            resolver.resolve_or_log(Outcome::Success(()));
        }
    }

    /// Runs `body` with one permit, released when the body's promise
    /// resolves with any outcome.
    pub fn run<T, F>(&self, body: F) -> Promise<T>
    where
        T: Value,
        F: FnOnce() -> Promise<T> + Send + 'static,
    {
        let semaphore = self.clone();
        self.acquire(1).flat_map(move |()| {
            let result = a_now(body);
            result.listen_sync(move |_| semaphore.release(1));
            result
        })
    }

    /// Returns a proxy whose operations always run on `vat`.
    #[must_use]
    pub fn export(&self, vat: &Vat) -> ExportedSemaphore {
        ExportedSemaphore {
            vat: vat.clone(),
            inner: self.clone(),
        }
    }
}

impl AsyncSemaphore for Semaphore {
    fn acquire(&self, permits: usize) -> Promise<()> {
        Self::acquire(self, permits)
    }

    fn release(&self, permits: usize) {
        Self::release(self, permits);
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Semaphore")
            .field("permits", &state.permits)
            .field("waiting", &state.pending.len())
            .finish()
    }
}

/// [`Semaphore`] proxy that forwards every operation to its owning vat.
#[derive(Clone, Debug)]
pub struct ExportedSemaphore {
    vat: Vat,
    inner: Semaphore,
}

impl AsyncSemaphore for ExportedSemaphore {
    fn acquire(&self, permits: usize) -> Promise<()> {
        let inner = self.inner.clone();
        a_later(&self.vat, move || inner.acquire(permits))
    }

    fn release(&self, permits: usize) {
        let inner = self.inner.clone();
        a_one_way(&self.vat, move || {
            inner.release(permits);
            Ok(())
        });
    }
}
