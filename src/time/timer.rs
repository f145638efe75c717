//! Timer thread for sleeps and timeouts.
//!
//! A [`Timer`] owns one thread that waits for the earliest deadline in a
//! min-heap and resolves the promises that are due. Listeners hop back to
//! their own vats as usual, so nothing runs on the timer thread except the
//! resolution itself.

use crate::error::Error;
use crate::promise::{Promise, Resolver};
use crate::runtime::{runtime_config, thread_name_prefix};
use crate::types::{Outcome, Value};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    resolver: Resolver<()>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: the earliest deadline is the heap maximum.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
    shutdown: bool,
}

#[derive(Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

impl TimerShared {
    /// Queues a deadline. The sequence number is `None` when the promise
    /// was resolved without queueing anything.
    fn schedule(&self, deadline: Instant) -> (Promise<()>, Option<u64>) {
        if deadline <= Instant::now() {
            return (Promise::success(()), None);
        }
        let (promise, resolver) = Promise::create();
        let mut state = self.state.lock();
        if state.shutdown {
            return (Promise::failure(Error::resource_closed()), None);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        let earliest = state.heap.peek().is_none_or(|head| deadline < head.deadline);
        state.heap.push(TimerEntry {
            deadline,
            seq,
            resolver,
        });
        drop(state);
        if earliest {
            self.wakeup.notify_one();
        }
        (promise, Some(seq))
    }

    /// Removes a queued deadline. Its promise fails with `ResolverDropped`.
    fn cancel(&self, seq: u64) {
        let removed = {
            let mut state = self.state.lock();
            let mut removed = None;
            let kept: Vec<_> = state
                .heap
                .drain()
                .filter_map(|entry| {
                    if entry.seq == seq {
                        removed = Some(entry);
                        None
                    } else {
                        Some(entry)
                    }
                })
                .collect();
            state.heap = BinaryHeap::from(kept);
            removed
        };
        // Dropped outside the lock: dropping the resolver notifies listeners.
        drop(removed);
    }
}

/// Deadline service running on its own thread.
///
/// Dropping the timer stops the thread; sleeps still pending fail with
/// [`ResourceClosed`](crate::ErrorKind::ResourceClosed).
pub struct Timer {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    /// Starts a timer thread named `{prefix}-timer`.
    pub fn new() -> Result<Self, Error> {
        let shared = Arc::new(TimerShared::default());
        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(format!("{}-timer", thread_name_prefix()))
            .stack_size(runtime_config().thread_stack_size)
            .spawn(move || run(&worker))
            .map_err(|e| Error::illegal_state("failed to spawn timer thread").with_source(e))?;
        tracing::debug!("timer thread started");
        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Resolves after `duration`.
    pub fn sleep(&self, duration: Duration) -> Promise<()> {
        match Instant::now().checked_add(duration) {
            Some(deadline) => self.sleep_until(deadline),
            None => Promise::never(),
        }
    }

    /// Resolves at `deadline`, right away if it already passed.
    pub fn sleep_until(&self, deadline: Instant) -> Promise<()> {
        self.shared.schedule(deadline).0
    }

    /// Resolves like `promise`, or fails with
    /// [`Timeout`](crate::ErrorKind::Timeout) if `duration` passes first.
    ///
    /// An expired timeout stops listening to `promise`, and a `promise` that
    /// resolves first removes its deadline from the timer. If the timer is
    /// dropped first, the result fails with
    /// [`ResourceClosed`](crate::ErrorKind::ResourceClosed).
    pub fn timeout<T: Value>(&self, promise: &Promise<T>, duration: Duration) -> Promise<T> {
        if promise.is_resolved() {
            return promise.clone();
        }
        let Some(deadline) = Instant::now().checked_add(duration) else {
            return promise.clone();
        };
        let (sleep, seq) = self.shared.schedule(deadline);
        let (result, resolver) = Promise::create();
        let expired = resolver.clone();
        let shared = Arc::clone(&self.shared);
        let key = promise.listen_sync(move |outcome| {
            if resolver.resolve(outcome).is_ok() {
                if let Some(seq) = seq {
                    shared.cancel(seq);
                }
            }
        });
        let source = promise.clone();
        sleep.listen_sync(move |slept| {
            source.forget(key);
            let timed_out = slept.is_success();
            let failure = match slept {
                Outcome::Success(()) => Error::timeout(),
                Outcome::Failure(error) => error,
            };
            if expired.resolve(Outcome::Failure(failure)).is_ok() && timed_out {
                tracing::debug!(?duration, "operation timed out");
            }
        });
        result
    }

    /// Number of sleeps not yet due.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.state.lock().heap.len()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                tracing::error!("timer thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("pending", &self.pending())
            .finish()
    }
}

fn pop_due(state: &mut TimerState, now: Instant) -> Vec<Resolver<()>> {
    let mut due = Vec::new();
    while state.heap.peek().is_some_and(|entry| entry.deadline <= now) {
        if let Some(entry) = state.heap.pop() {
            due.push(entry.resolver);
        }
    }
    due
}

fn run(shared: &TimerShared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            let abandoned: Vec<_> = state.heap.drain().map(|entry| entry.resolver).collect();
            MutexGuard::unlocked(&mut state, || {
                for resolver in abandoned {
                    resolver.resolve_or_log(Outcome::Failure(Error::resource_closed()));
                }
            });
            break;
        }
        let due = pop_due(&mut state, Instant::now());
        if !due.is_empty() {
            MutexGuard::unlocked(&mut state, || {
                for resolver in due {
                    resolver.resolve_or_log(Outcome::Success(()));
                }
            });
            continue;
        }
        match state.heap.peek().map(|entry| entry.deadline) {
            Some(deadline) => {
                let _ = shared.wakeup.wait_until(&mut state, deadline);
            }
            None => shared.wakeup.wait(&mut state),
        }
    }
    tracing::debug!("timer thread stopped");
}
