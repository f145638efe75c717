//! Vat identity, the current-vat marker, and the backend seam.
//!
//! A [`Vat`] is a handle to a serial executor. Backends decide *where* an
//! action runs (a dedicated thread, a pool, or the calling thread); the
//! handle carries identity and the entry protocol that marks a vat as
//! current on a thread while it runs a batch.

use crate::error::{Error, ErrorKind};
use core::fmt;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A unit of work scheduled on a vat.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

static NEXT_VAT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_VAT: RefCell<Option<Vat>> = const { RefCell::new(None) };
}

/// A unique identifier for a vat.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VatId(u64);

impl VatId {
    fn next() -> Self {
        Self(NEXT_VAT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for VatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VatId({})", self.0)
    }
}

impl fmt::Display for VatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}

/// Where a vat's actions actually run.
///
/// Implementations must never run two actions of the same vat at once, and
/// must eventually run every accepted action unless the vat is stopped.
/// Backends that run actions as batches should enter the vat (see
/// [`Vat::enter`]) around each batch so that [`Vat::current`] works inside
/// the actions.
pub trait VatBackend: Send + Sync + 'static {
    /// Accepts an action for later execution on `vat`.
    fn execute(&self, vat: &Vat, action: Action);
}

struct VatCore {
    id: VatId,
    name: String,
    active: AtomicBool,
    backend: Box<dyn VatBackend>,
}

/// Handle to a serial executor.
///
/// Cloning a handle is cheap; all clones refer to the same vat.
#[derive(Clone)]
pub struct Vat {
    core: Arc<VatCore>,
}

impl Vat {
    /// Creates a vat that runs its actions through `backend`.
    pub fn with_backend(name: impl Into<String>, backend: impl VatBackend) -> Self {
        Self {
            core: Arc::new(VatCore {
                id: VatId::next(),
                name: name.into(),
                active: AtomicBool::new(false),
                backend: Box::new(backend),
            }),
        }
    }

    /// Returns the vat identifier.
    #[must_use]
    pub fn id(&self) -> VatId {
        self.core.id
    }

    /// Returns the vat name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Schedules `action` to run on this vat.
    ///
    /// Returns immediately. Actions submitted from one thread run in
    /// submission order. A panic inside `action` is logged and contained.
    pub fn execute<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.backend.execute(self, Box::new(action));
    }

    /// Schedules an already boxed action.
    pub fn execute_boxed(&self, action: Action) {
        self.core.backend.execute(self, action);
    }

    /// Returns the vat active on the calling thread.
    pub fn current() -> Result<Self, Error> {
        Self::current_or_none().ok_or_else(Error::no_vat)
    }

    /// Returns the vat active on the calling thread, if any.
    #[must_use]
    pub fn current_or_none() -> Option<Self> {
        CURRENT_VAT
            .try_with(|current| current.borrow().clone())
            .ok()
            .flatten()
    }

    /// Returns true if some vat is active on the calling thread.
    #[must_use]
    pub fn is_vat_available() -> bool {
        CURRENT_VAT
            .try_with(|current| current.borrow().is_some())
            .unwrap_or(false)
    }

    /// Returns the current vat, or the shared daemon vat when none is active.
    #[must_use]
    pub fn default_vat() -> Self {
        Self::current_or_none().unwrap_or_else(super::daemon_vat)
    }

    /// Returns true if this vat is the one active on the calling thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        CURRENT_VAT
            .try_with(|current| {
                current
                    .borrow()
                    .as_ref()
                    .is_some_and(|vat| vat.core.id == self.core.id)
            })
            .unwrap_or(false)
    }

    /// Marks this vat as current on the calling thread.
    ///
    /// Fails if another vat is already active on this thread, or if this vat
    /// is running on another thread. The returned guard restores the thread
    /// state on drop.
    pub fn enter(&self) -> Result<VatGuard, Error> {
        let occupied = CURRENT_VAT.with(|current| current.borrow().clone());
        if let Some(other) = occupied {
            return Err(Error::new(ErrorKind::VatAlreadyActive).with_message(format!(
                "cannot enter {} while {} is active on this thread",
                self.core.id, other.core.id
            )));
        }
        if self
            .core
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::new(ErrorKind::VatAlreadyActive).with_message(format!(
                "{} is running on another thread",
                self.core.id
            )));
        }
        CURRENT_VAT.with(|current| *current.borrow_mut() = Some(self.clone()));
        Ok(VatGuard {
            vat: self.clone(),
            _not_send: PhantomData,
        })
    }
}

impl PartialEq for Vat {
    fn eq(&self, other: &Self) -> bool {
        self.core.id == other.core.id
    }
}

impl Eq for Vat {}

impl fmt::Debug for Vat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vat")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .finish_non_exhaustive()
    }
}

/// Marks a vat as current on this thread until dropped.
///
/// Not `Send`: the guard must be dropped on the thread that entered.
#[must_use = "the vat is left as soon as the guard is dropped"]
pub struct VatGuard {
    vat: Vat,
    _not_send: PhantomData<Rc<()>>,
}

impl VatGuard {
    /// Returns the entered vat.
    #[must_use]
    pub fn vat(&self) -> &Vat {
        &self.vat
    }
}

impl Drop for VatGuard {
    fn drop(&mut self) {
        let _ = CURRENT_VAT.try_with(|current| {
            let mut current = current.borrow_mut();
            if current.as_ref() == Some(&self.vat) {
                *current = None;
            } else {
                tracing::error!(
                    vat = %self.vat.id(),
                    "vat guard dropped while another vat is current"
                );
            }
        });
        self.vat.core.active.store(false, Ordering::Release);
    }
}

impl fmt::Debug for VatGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VatGuard").field("vat", &self.vat.id()).finish()
    }
}
