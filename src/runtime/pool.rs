//! Daemon thread pool.
//!
//! The daemon pool backs the shared daemon vat and any executor vats created
//! on it. Threads are spawned lazily up to `daemon_threads`; a thread that
//! stays idle past `daemon_idle_timeout` exits. Pool threads are detached, so
//! the pool never keeps the process alive.

use super::config::RuntimeConfig;
use super::executor::Executor;
use super::vat::Action;
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

static DAEMON_POOL: OnceLock<DaemonPool> = OnceLock::new();

struct PoolInner {
    queue: SegQueue<Action>,
    /// Guards the idle count; workers park on `condvar` while holding it.
    idle: Mutex<usize>,
    condvar: Condvar,
    active_threads: AtomicUsize,
    spawned_total: AtomicUsize,
    max_threads: usize,
    thread_name_prefix: String,
    thread_stack_size: usize,
    idle_timeout: Duration,
}

/// A lazily growing pool of detached worker threads.
#[derive(Clone)]
pub struct DaemonPool {
    inner: Arc<PoolInner>,
}

impl DaemonPool {
    /// Creates a pool from `config`. No thread starts until work arrives.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        let mut config = config.clone();
        config.normalize();
        Self {
            inner: Arc::new(PoolInner {
                queue: SegQueue::new(),
                idle: Mutex::new(0),
                condvar: Condvar::new(),
                active_threads: AtomicUsize::new(0),
                spawned_total: AtomicUsize::new(0),
                max_threads: config.daemon_threads,
                thread_name_prefix: config.thread_name_prefix,
                thread_stack_size: config.thread_stack_size,
                idle_timeout: config.daemon_idle_timeout,
            }),
        }
    }

    /// Submits a job.
    pub fn spawn(&self, job: Action) {
        self.inner.queue.push(job);
        let idle = self.inner.idle.lock();
        if *idle > 0 {
            self.inner.condvar.notify_one();
            return;
        }
        if !spawn_worker(&self.inner) {
            // At the thread limit: a busy worker will pick the job up.
            self.inner.condvar.notify_one();
        }
    }

    /// Number of live worker threads.
    pub fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Acquire)
    }

    /// Number of jobs waiting for a thread.
    pub fn pending_count(&self) -> usize {
        self.inner.queue.len()
    }

    /// Maximum number of worker threads.
    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.inner.max_threads
    }
}

impl Executor for DaemonPool {
    fn spawn(&self, job: Action) {
        Self::spawn(self, job);
    }
}

impl std::fmt::Debug for DaemonPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonPool")
            .field("active_threads", &self.active_threads())
            .field("pending", &self.pending_count())
            .field("max_threads", &self.inner.max_threads)
            .finish_non_exhaustive()
    }
}

/// Starts a worker unless the pool is at its limit. Returns false when no
/// worker was started. Called with the idle lock held.
fn spawn_worker(inner: &Arc<PoolInner>) -> bool {
    let reserved = inner
        .active_threads
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
            (active < inner.max_threads).then_some(active + 1)
        })
        .is_ok();
    if !reserved {
        return false;
    }

    let worker = Arc::clone(inner);
    let index = inner.spawned_total.fetch_add(1, Ordering::Relaxed);
    let spawned = thread::Builder::new()
        .name(format!("{}-daemon-{index}", inner.thread_name_prefix))
        .stack_size(inner.thread_stack_size)
        .spawn(move || worker_loop(&worker));
    if let Err(error) = spawned {
        inner.active_threads.fetch_sub(1, Ordering::AcqRel);
        tracing::error!(%error, "failed to spawn daemon thread");
        return false;
    }
    tracing::trace!(index, "daemon thread started");
    true
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(job) = inner.queue.pop() {
            super::run_contained(job, "daemon");
            continue;
        }

        let mut idle = inner.idle.lock();
        if !inner.queue.is_empty() {
            continue;
        }
        *idle += 1;
        let timed_out = inner
            .condvar
            .wait_for(&mut idle, inner.idle_timeout)
            .timed_out();
        *idle -= 1;
        if timed_out && inner.queue.is_empty() {
            // Leave the count while still holding the lock so a concurrent
            // submit sees the free slot.
            inner.active_threads.fetch_sub(1, Ordering::AcqRel);
            tracing::trace!("daemon thread retiring after idle timeout");
            return;
        }
    }
}

/// Returns the process-wide daemon pool, creating it on first use from
/// [`runtime_config`](super::runtime_config).
pub fn daemon_pool() -> &'static DaemonPool {
    DAEMON_POOL.get_or_init(|| DaemonPool::new(super::runtime_config()))
}
