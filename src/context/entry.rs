//! Active context entries.

use crate::runtime::contain;
use core::fmt;
use std::cell::RefCell;
use std::thread::LocalKey;

/// An entry that changes thread state while its context is entered.
pub trait ActiveEntry: Send + Sync + 'static {
    /// Applies the entry to the current thread and returns how to undo it.
    fn apply(&self) -> Restore;
}

/// Undo action returned by [`ActiveEntry::apply`]. Runs when dropped.
#[must_use = "dropping a Restore undoes the entry immediately"]
pub struct Restore {
    undo: Option<Box<dyn FnOnce()>>,
}

impl Restore {
    /// Creates a restore that runs `undo`.
    pub fn new<F: FnOnce() + 'static>(undo: F) -> Self {
        Self {
            undo: Some(Box::new(undo)),
        }
    }

    /// A restore with nothing to undo.
    pub fn noop() -> Self {
        Self { undo: None }
    }
}

impl Drop for Restore {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            contain("context restore", undo);
        }
    }
}

impl fmt::Debug for Restore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Restore")
            .field("pending", &self.undo.is_some())
            .finish()
    }
}

/// Binds a value to a thread-local slot while the context is entered.
///
/// ```
/// use std::cell::RefCell;
/// use vatflow::{Context, ContextKey, context::ThreadLocalEntry};
///
/// thread_local! {
///     static TENANT: RefCell<Option<String>> = const { RefCell::new(None) };
/// }
///
/// let key = ContextKey::new("tenant");
/// let ctx = Context::empty().with_active(key, ThreadLocalEntry::new(&TENANT, "acme".to_string()));
/// ctx.run(|| assert_eq!(TENANT.with(|t| t.borrow().clone()).as_deref(), Some("acme")));
/// assert_eq!(TENANT.with(|t| t.borrow().clone()), None);
/// ```
pub struct ThreadLocalEntry<T: 'static> {
    slot: &'static LocalKey<RefCell<Option<T>>>,
    value: T,
}

impl<T: Clone + Send + Sync + 'static> ThreadLocalEntry<T> {
    /// Creates an entry that stores `value` in `slot`.
    pub const fn new(slot: &'static LocalKey<RefCell<Option<T>>>, value: T) -> Self {
        Self { slot, value }
    }

    /// The bound value.
    pub const fn value(&self) -> &T {
        &self.value
    }
}

impl<T: Clone + Send + Sync + 'static> ActiveEntry for ThreadLocalEntry<T> {
    fn apply(&self) -> Restore {
        let slot = self.slot;
        let previous = slot.with(|cell| cell.replace(Some(self.value.clone())));
        Restore::new(move || {
            let _ = slot.try_with(|cell| cell.replace(previous));
        })
    }
}

impl<T: fmt::Debug> fmt::Debug for ThreadLocalEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadLocalEntry")
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextKey};

    thread_local! {
        static SLOT: RefCell<Option<u32>> = const { RefCell::new(None) };
    }

    fn read() -> Option<u32> {
        SLOT.with(|slot| *slot.borrow())
    }

    #[test]
    fn nested_contexts_restore_outer_binding() {
        let key = ContextKey::new("slot");
        let outer = Context::empty().with_active(key, ThreadLocalEntry::new(&SLOT, 1));
        let inner = Context::empty().with_active(key, ThreadLocalEntry::new(&SLOT, 2));
        outer.run(|| {
            assert_eq!(read(), Some(1));
            inner.run(|| assert_eq!(read(), Some(2)));
            assert_eq!(read(), Some(1));
        });
        assert_eq!(read(), None);
    }

    #[test]
    fn noop_restore_does_nothing() {
        drop(Restore::noop());
        assert_eq!(read(), None);
    }
}
