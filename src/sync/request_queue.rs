//! FIFO serialization of asynchronous actions.
//!
//! A [`RequestQueue`] runs submitted actions one at a time: an action starts
//! only after the promise of the previous one resolved, success or failure.
//! It retrofits sequential access onto resources that cannot take
//! overlapping requests, such as a single connection.
//!
//! # Suspension
//!
//! An action that cannot make progress yet awaits
//! [`suspend`](RequestQueue::suspend), which resolves on the next
//! [`resume`](RequestQueue::resume). The queue stays occupied meanwhile, so
//! later actions wait behind the parked one. Loop bodies use
//! [`suspend_then_true`](RequestQueue::suspend_then_true) to park and then
//! re-check their condition.

use crate::combinator::{a_now, a_seq_until_value, a_seq_while};
use crate::error::Error;
use crate::promise::{Promise, Resolver};
use crate::types::{Outcome, Value};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Default)]
struct QueueState {
    running: bool,
    suspended: Option<Resolver<()>>,
    waiting: VecDeque<Resolver<()>>,
}

/// At-most-one-in-flight action queue. Clones share the queue.
#[derive(Clone, Default)]
pub struct RequestQueue {
    state: Arc<Mutex<QueueState>>,
}

impl RequestQueue {
    /// Creates an idle queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `action` once every previously submitted action completed.
    ///
    /// If the queue is idle the action starts right away on the calling
    /// thread; otherwise it starts on the caller's default vat when its turn
    /// comes.
    pub fn run<T, F>(&self, action: F) -> Promise<T>
    where
        T: Value,
        F: FnOnce() -> Promise<T> + Send + 'static,
    {
        let blocker = {
            let mut state = self.state.lock();
            if state.running {
                let (turn, resolver) = Promise::create();
                state.waiting.push_back(resolver);
                Some(turn)
            } else {
                state.running = true;
                None
            }
        };
        let result = match blocker {
            None => a_now(action),
            Some(turn) => turn.then_flat_get(action),
        };
        let queue = self.clone();
        result.listen_sync(move |_| queue.start_next());
        result
    }

    fn start_next(&self) {
        let next = {
            let mut state = self.state.lock();
            let next = state.waiting.pop_front();
            state.running = next.is_some();
            next
        };
        if let Some(next) = next {
            next.resolve_or_log(Outcome::Success(()));
        }
    }

    /// Parks the caller until the next [`resume`](Self::resume).
    ///
    /// Fails with [`IllegalState`](crate::ErrorKind::IllegalState) while
    /// another suspend is waiting.
    pub fn suspend(&self) -> Promise<()> {
        let mut state = self.state.lock();
        if state.suspended.is_some() {
            return Promise::failure(Error::illegal_state("request queue already suspended"));
        }
        let (parked, resolver) = Promise::create();
        state.suspended = Some(resolver);
        parked
    }

    /// Wakes the pending [`suspend`](Self::suspend), if any.
    pub fn resume(&self) {
        let parked = self.state.lock().suspended.take();
        if let Some(parked) = parked {
            parked.resolve_or_log(Outcome::Success(()));
        }
    }

    /// Suspends and yields `true` once resumed, for `while` loop bodies
    /// that re-check their condition.
    pub fn suspend_then_true(&self) -> Promise<bool> {
        self.suspend_then(true)
    }

    /// Suspends and yields `None` once resumed, for `until_value` loop
    /// bodies.
    pub fn suspend_then_empty<T: Value>(&self) -> Promise<Option<T>> {
        self.suspend_then(None)
    }

    fn suspend_then<T: Value>(&self, value: T) -> Promise<T> {
        let (promise, resolver) = Promise::create();
        self.suspend()
            .listen_sync(move |outcome| resolver.resolve_or_log(outcome.map(|()| value)));
        promise
    }

    /// Runs a `while` loop as one queued action.
    pub fn run_seq_while<F>(&self, body: F) -> Promise<()>
    where
        F: FnMut() -> Promise<bool> + Send + 'static,
    {
        self.run(move || a_seq_while(body))
    }

    /// Runs an `until_value` loop as one queued action.
    pub fn run_seq_until_value<T, F>(&self, body: F) -> Promise<T>
    where
        T: Value,
        F: FnMut() -> Promise<Option<T>> + Send + 'static,
    {
        self.run(move || a_seq_until_value(body))
    }

    /// Returns true while an action is in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Returns true while a suspend waits for [`resume`](Self::resume).
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended.is_some()
    }

    /// Number of actions waiting for their turn.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().waiting.len()
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RequestQueue")
            .field("running", &state.running)
            .field("suspended", &state.suspended.is_some())
            .field("waiting", &state.waiting.len())
            .finish()
    }
}
