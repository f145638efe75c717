//! Vat owned by a single thread.
//!
//! A [`SingleThreadVat`] runs its loop either on a dedicated thread
//! ([`SingleThreadVat::spawn`]) or on the calling thread
//! ([`SingleThreadVat::run_in_current_thread`], used by `block_on`). The loop
//! drains batches while work is queued and parks on a condition variable
//! otherwise. [`stop`](SingleThreadVat::stop) ends the loop after the current
//! action; queued and later actions are dropped, which fails the promises
//! they would have resolved with [`ResolverDropped`](crate::ErrorKind::ResolverDropped).
//! [`SingleThreadVat::try_execute`] reports a late submission as
//! [`VatStopped`](crate::ErrorKind::VatStopped) instead.

use super::batched::BatchedQueue;
use super::vat::{Action, Vat, VatBackend};
use crate::error::{Error, ErrorKind};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;

/// Lifecycle of a single-thread vat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VatState {
    /// Created; the loop has not started.
    Created = 0,
    /// The loop is running.
    Running = 1,
    /// Stop was requested; the loop is finishing its current action.
    Stopping = 2,
    /// The loop has exited.
    Stopped = 3,
}

impl VatState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

struct Shared {
    queue: BatchedQueue,
    state: AtomicU8,
    wakeup: Mutex<bool>,
    condvar: Condvar,
}

impl Shared {
    fn state(&self) -> VatState {
        VatState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: VatState, to: VatState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn wake(&self) {
        let mut pending = self.wakeup.lock();
        *pending = true;
        self.condvar.notify_one();
    }

    fn wait_for_work(&self) {
        let mut pending = self.wakeup.lock();
        while !*pending && self.state() == VatState::Running {
            self.condvar.wait(&mut pending);
        }
        *pending = false;
    }

    fn submit(&self, action: Action) -> Result<(), Error> {
        if matches!(self.state(), VatState::Stopping | VatState::Stopped) {
            return Err(Error::new(ErrorKind::VatStopped));
        }
        if self.queue.push(action) {
            self.wake();
        }
        Ok(())
    }

    fn stop(&self) -> bool {
        let stopped =
            self.transition(VatState::Running, VatState::Stopping)
                || self.transition(VatState::Created, VatState::Stopped);
        if stopped {
            self.wake();
        }
        stopped
    }
}

struct SingleThreadBackend {
    shared: Arc<Shared>,
}

impl VatBackend for SingleThreadBackend {
    fn execute(&self, vat: &Vat, action: Action) {
        if let Err(error) = self.shared.submit(action) {
            tracing::debug!(vat = %vat.id(), %error, "dropping action");
        }
    }
}

/// A vat whose actions all run on one thread.
pub struct SingleThreadVat {
    vat: Vat,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SingleThreadVat {
    /// Creates a vat with the default batch size. Nothing runs until the
    /// loop is started.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_batch_size(name, super::default_batch_size())
    }

    /// Creates a vat with an explicit batch size.
    #[must_use]
    pub fn with_batch_size(name: impl Into<String>, batch_size: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: BatchedQueue::new(batch_size),
            state: AtomicU8::new(VatState::Created as u8),
            wakeup: Mutex::new(false),
            condvar: Condvar::new(),
        });
        let vat = Vat::with_backend(
            name,
            SingleThreadBackend {
                shared: Arc::clone(&shared),
            },
        );
        Self {
            vat,
            shared,
            thread: Mutex::new(None),
        }
    }

    /// Creates a vat and starts its loop on a dedicated named thread.
    pub fn spawn(name: impl Into<String>) -> Result<Self, Error> {
        let this = Self::new(name);
        if !this.shared.transition(VatState::Created, VatState::Running) {
            return Err(Error::illegal_state("vat loop already started"));
        }
        let shared = Arc::clone(&this.shared);
        let vat = this.vat.clone();
        let thread_name = format!("{}-{}", super::thread_name_prefix(), this.vat.name());
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_loop(&shared, &vat))
            .map_err(|e| {
                this.shared
                    .state
                    .store(VatState::Stopped as u8, Ordering::Release);
                Error::new(ErrorKind::IllegalState)
                    .with_message("failed to spawn vat thread")
                    .with_source(e)
            })?;
        *this.thread.lock() = Some(handle);
        Ok(this)
    }

    /// Returns the vat handle.
    #[must_use]
    pub fn vat(&self) -> &Vat {
        &self.vat
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> VatState {
        self.shared.state()
    }

    /// Runs the vat loop on the calling thread until [`stop`](Self::stop).
    pub fn run_in_current_thread(&self) -> Result<(), Error> {
        if !self.shared.transition(VatState::Created, VatState::Running) {
            return Err(Error::illegal_state(format!(
                "vat loop cannot start from state {:?}",
                self.shared.state()
            )));
        }
        run_loop(&self.shared, &self.vat);
        Ok(())
    }

    /// Schedules `action` like [`Vat::execute`], but reports a vat that is
    /// stopping or stopped instead of dropping the action silently.
    pub fn try_execute<F>(&self, action: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.submit(Box::new(action))
    }

    /// Requests the loop to stop. Returns false if it was already stopping.
    pub fn stop(&self) -> bool {
        self.shared.stop()
    }

    /// Returns a sendable handle that can stop this vat from any thread.
    #[must_use]
    pub fn stopper(&self) -> VatStopper {
        VatStopper {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Waits for a dedicated loop thread to exit.
    pub fn join(&self) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(vat = %self.vat.id(), "vat thread panicked");
            }
        }
    }
}

impl Drop for SingleThreadVat {
    fn drop(&mut self) {
        if self.thread.get_mut().is_some() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for SingleThreadVat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadVat")
            .field("vat", &self.vat)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Sendable capability to stop a [`SingleThreadVat`].
#[derive(Clone)]
pub struct VatStopper {
    shared: Arc<Shared>,
}

impl VatStopper {
    /// Requests the loop to stop.
    pub fn stop(&self) -> bool {
        self.shared.stop()
    }
}

impl std::fmt::Debug for VatStopper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VatStopper")
            .field("state", &self.shared.state())
            .finish()
    }
}

fn run_loop(shared: &Shared, vat: &Vat) {
    tracing::trace!(vat = %vat.id(), name = vat.name(), "vat loop started");
    let running = || shared.state() == VatState::Running;
    let mut has_more = true;
    while running() {
        if !has_more {
            shared.wait_for_work();
            if !running() {
                break;
            }
        }
        has_more = shared.queue.run_batch(vat, running);
    }
    shared
        .state
        .store(VatState::Stopped as u8, Ordering::Release);
    let dropped = shared.queue.clear();
    tracing::trace!(vat = %vat.id(), dropped, "vat loop stopped");
}
