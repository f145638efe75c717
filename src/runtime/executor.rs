//! Executor-backed vats.
//!
//! An executor vat borrows threads from an [`Executor`] (by default the
//! daemon pool). Actions are queued in a [`BatchedQueue`]; whichever producer
//! claims the scheduling flag submits one drain job, and a drain that leaves
//! work behind submits the next one. Successive batches may therefore run on
//! different threads, but never at the same time.

use super::batched::BatchedQueue;
use super::pool::daemon_pool;
use super::vat::{Action, Vat, VatBackend};
use std::sync::Arc;
use std::sync::LazyLock;

/// Something that runs jobs on some thread, eventually.
pub trait Executor: Send + Sync + 'static {
    /// Submits a job.
    fn spawn(&self, job: Action);
}

impl<F> Executor for F
where
    F: Fn(Action) + Send + Sync + 'static,
{
    fn spawn(&self, job: Action) {
        self(job);
    }
}

struct ExecutorBackend {
    queue: Arc<BatchedQueue>,
    executor: Arc<dyn Executor>,
}

impl VatBackend for ExecutorBackend {
    fn execute(&self, vat: &Vat, action: Action) {
        if self.queue.push(action) {
            schedule_drain(
                Arc::clone(&self.queue),
                Arc::clone(&self.executor),
                vat.clone(),
            );
        }
    }
}

fn schedule_drain(queue: Arc<BatchedQueue>, executor: Arc<dyn Executor>, vat: Vat) {
    let next = Arc::clone(&executor);
    executor.spawn(Box::new(move || {
        if queue.run_batch(&vat, || true) {
            schedule_drain(queue, next, vat);
        }
    }));
}

/// Creates a vat that runs its batches on `executor`.
pub fn executor_vat(
    name: impl Into<String>,
    executor: Arc<dyn Executor>,
    batch_size: usize,
) -> Vat {
    Vat::with_backend(
        name,
        ExecutorBackend {
            queue: Arc::new(BatchedQueue::new(batch_size)),
            executor,
        },
    )
}

static DAEMON_VAT: LazyLock<Vat> = LazyLock::new(|| {
    let pool = daemon_pool();
    executor_vat("daemon", Arc::new(pool.clone()), super::default_batch_size())
});

/// Returns the shared daemon vat.
///
/// Continuations registered off-vat are dispatched here. Use [`new_daemon_vat`]
/// for work that should not be serialized with other daemon continuations.
#[must_use]
pub fn daemon_vat() -> Vat {
    DAEMON_VAT.clone()
}

/// Creates a fresh executor vat on the daemon pool.
#[must_use]
pub fn new_daemon_vat(name: impl Into<String>) -> Vat {
    executor_vat(
        name,
        Arc::new(daemon_pool().clone()),
        super::default_batch_size(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    /// Executor that gives every drain job its own thread, so overlapping
    /// drains would be observable.
    fn thread_per_job() -> Arc<dyn Executor> {
        Arc::new(|job: Action| {
            std::thread::spawn(job);
        })
    }

    #[test]
    fn actions_from_one_thread_keep_order() {
        let vat = executor_vat("ordered", thread_per_job(), 3);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel();
        for i in 0..50 {
            let seen = Arc::clone(&seen);
            vat.execute(move || seen.lock().push(i));
        }
        vat.execute(move || tx.send(()).expect("send"));
        rx.recv_timeout(Duration::from_secs(5)).expect("drained");
        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn batches_never_overlap() {
        let vat = executor_vat("serial", thread_per_job(), 2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let vat = vat.clone();
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                let done = Arc::clone(&done);
                let tx = tx.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        let in_flight = Arc::clone(&in_flight);
                        let max_seen = Arc::clone(&max_seen);
                        let done = Arc::clone(&done);
                        let tx = tx.clone();
                        vat.execute(move || {
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            if done.fetch_add(1, Ordering::SeqCst) + 1 == 1_000 {
                                tx.send(()).expect("send");
                            }
                        });
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().expect("producer");
        }
        rx.recv_timeout(Duration::from_secs(10)).expect("all ran");
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn daemon_vat_is_shared() {
        assert_eq!(daemon_vat(), daemon_vat());
        assert_ne!(new_daemon_vat("a"), new_daemon_vat("b"));
    }
}
