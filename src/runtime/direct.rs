//! Direct vat and the per-thread trampoline.
//!
//! The trampoline runs actions on the calling thread. An action submitted
//! while another trampolined action is running on the same thread is queued
//! and run by the outermost call once the current action returns, so chains
//! of immediately-completing callbacks never grow the stack.

use super::vat::{Action, Vat, VatBackend};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::LazyLock;

thread_local! {
    static TRAMPOLINE: RefCell<Option<VecDeque<Action>>> = const { RefCell::new(None) };
}

/// Runs `action` on this thread, deferring it if a trampolined action is
/// already running here.
pub(crate) fn trampoline(action: Action) {
    let first = TRAMPOLINE.try_with(|cell| {
        let mut slot = cell.borrow_mut();
        match slot.as_mut() {
            Some(queue) => {
                queue.push_back(action);
                None
            }
            None => {
                *slot = Some(VecDeque::new());
                Some(action)
            }
        }
    });
    let first = match first {
        Ok(Some(action)) => action,
        Ok(None) => return,
        // Thread-local storage is being torn down; nothing can be queued.
        Err(_) => return,
    };

    let _drain = DrainGuard;
    super::run_contained(first, "trampoline");
    while let Some(next) = TRAMPOLINE
        .try_with(|cell| cell.borrow_mut().as_mut().and_then(VecDeque::pop_front))
        .ok()
        .flatten()
    {
        super::run_contained(next, "trampoline");
    }
}

/// Returns true while the calling thread is draining the trampoline.
pub(crate) fn is_draining() -> bool {
    TRAMPOLINE
        .try_with(|cell| cell.borrow().is_some())
        .unwrap_or(false)
}

struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let _ = TRAMPOLINE.try_with(|cell| cell.borrow_mut().take());
    }
}

struct DirectBackend;

impl VatBackend for DirectBackend {
    fn execute(&self, _vat: &Vat, action: Action) {
        trampoline(action);
    }
}

static DIRECT: LazyLock<Vat> = LazyLock::new(|| Vat::with_backend("direct", DirectBackend));

/// Returns the direct vat.
///
/// The direct vat runs actions immediately on the submitting thread, through
/// the trampoline. It is meant for leaf glue such as forwarding an outcome;
/// it never becomes the current vat, and it serializes actions only per
/// thread.
#[must_use]
pub fn direct_vat() -> Vat {
    DIRECT.clone()
}
