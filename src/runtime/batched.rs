//! Batched action queue shared by the thread-backed vats.
//!
//! Producers push actions from any thread. The producer that flips the
//! `scheduled` flag from false to true owns the duty of arranging a drain;
//! every other producer just enqueues. A drain runs up to `batch_size`
//! actions with the vat entered, then releases the flag and re-claims it if
//! work arrived in the meantime.

use super::vat::{Action, Vat};
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, Ordering};

/// An action queue drained in bounded batches.
#[derive(Debug)]
pub struct BatchedQueue {
    inner: SegQueue<Action>,
    scheduled: AtomicBool,
    batch_size: usize,
}

impl BatchedQueue {
    /// Creates a queue that runs at most `batch_size` actions per drain.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            inner: SegQueue::new(),
            scheduled: AtomicBool::new(false),
            batch_size: batch_size.max(1),
        }
    }

    /// Enqueues an action.
    ///
    /// Returns true when the caller claimed the scheduling duty and must
    /// arrange for [`run_batch`](Self::run_batch) to be called.
    pub fn push(&self, action: Action) -> bool {
        self.inner.push(action);
        self.try_claim()
    }

    /// Runs one batch on `vat`.
    ///
    /// `keep_going` is checked before every action; returning false stops
    /// the batch early. Returns true when more work remains and the caller
    /// has re-claimed the scheduling duty.
    pub fn run_batch(&self, vat: &Vat, keep_going: impl Fn() -> bool) -> bool {
        match vat.enter() {
            Ok(_guard) => {
                for _ in 0..self.batch_size {
                    if !keep_going() {
                        break;
                    }
                    match self.inner.pop() {
                        Some(action) => super::run_contained(action, vat.name()),
                        None => break,
                    }
                }
            }
            Err(error) => {
                tracing::error!(vat = %vat.id(), %error, "cannot enter vat to run batch");
            }
        }
        self.scheduled.store(false, Ordering::Release);
        !self.inner.is_empty() && keep_going() && self.try_claim()
    }

    /// Drops every queued action, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.inner.pop().is_some() {
            dropped += 1;
        }
        dropped
    }

    /// Returns the number of queued actions.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no actions are queued.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the configured batch size.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn try_claim(&self) -> bool {
        self.scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
