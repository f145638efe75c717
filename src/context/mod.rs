//! Ambient context that follows a computation across vats and threads.
//!
//! A [`Context`] is an immutable list of keyed entries. Some entries are
//! plain values read with [`Context::get`]; others are *active*
//! ([`ActiveEntry`]): entering the context applies them to the thread (for
//! example by setting a thread-local) and leaving it undoes that.
//!
//! [`Promise::listen_on`](crate::Promise::listen_on) captures the current
//! context when a continuation is registered and enters it around the
//! continuation when it runs, on whatever thread that is. Code written in
//! callback style therefore sees the ambient state of the code that
//! registered it, as if the whole chain had run on one thread.
//!
//! Entering is always paired with leaving: the guard returned by
//! [`Context::enter`] reinstalls the previous context on drop, also while
//! unwinding.

mod entry;
mod flows;

pub use entry::{ActiveEntry, Restore, ThreadLocalEntry};
pub use flows::{in_context, in_context_async, in_context_with};

use crate::runtime::contain;
use core::fmt;
use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

/// Typed key of a context entry.
///
/// Every call to [`ContextKey::new`] creates a distinct key, so keys are
/// usually created once and kept in a `static` `LazyLock` or passed around.
pub struct ContextKey<T> {
    id: u64,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    /// Creates a new key. `name` is used in diagnostics only.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
            name,
            _marker: PhantomData,
        }
    }

    /// The diagnostic name of the key.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> PartialEq for ContextKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({}#{})", self.name, self.id)
    }
}

struct Node {
    key: u64,
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
    active: Option<Arc<dyn ActiveEntry>>,
    next: Option<Arc<Node>>,
}

/// An immutable set of ambient entries.
///
/// Cloning is cheap and `with`/`without` share structure with the original.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Node>>,
    len: usize,
}

impl Context {
    /// The context with no entries.
    #[must_use]
    pub const fn empty() -> Self {
        Self { head: None, len: 0 }
    }

    /// The context entered on this thread, or the empty context.
    #[must_use]
    pub fn current() -> Self {
        INSTALLED
            .try_with(|installed| installed.borrow().context.clone())
            .unwrap_or_default()
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the context has no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn nodes(&self) -> impl Iterator<Item = &Node> {
        std::iter::successors(self.head.as_deref(), |node| node.next.as_deref())
    }

    fn find(&self, key: u64) -> Option<&Node> {
        self.nodes().find(|node| node.key == key)
    }

    /// Returns a clone of the value stored under `key`.
    #[must_use]
    pub fn get<T>(&self, key: ContextKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.find(key.id)
            .and_then(|node| node.value.downcast_ref::<T>())
            .cloned()
    }

    /// Returns true if an entry is stored under `key`.
    #[must_use]
    pub fn contains<T>(&self, key: ContextKey<T>) -> bool {
        self.find(key.id).is_some()
    }

    fn push(&self, node: Node) -> Self {
        let base = self.remove(node.key);
        Self {
            len: base.len + 1,
            head: Some(Arc::new(Node {
                next: base.head,
                ..node
            })),
        }
    }

    fn remove(&self, key: u64) -> Self {
        if self.find(key).is_none() {
            return self.clone();
        }
        let mut prefix = Vec::new();
        let mut rest = self.head.clone();
        while let Some(node) = rest {
            if node.key == key {
                rest = node.next.clone();
                break;
            }
            rest = node.next.clone();
            prefix.push(node);
        }
        let mut head = rest;
        for node in prefix.into_iter().rev() {
            head = Some(Arc::new(Node {
                key: node.key,
                name: node.name,
                value: Arc::clone(&node.value),
                active: node.active.clone(),
                next: head,
            }));
        }
        Self {
            head,
            len: self.len - 1,
        }
    }

    /// Returns a context with `value` stored under `key`, replacing any
    /// previous value.
    #[must_use]
    pub fn with<T>(&self, key: ContextKey<T>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.push(Node {
            key: key.id,
            name: key.name,
            value: Arc::new(value),
            active: None,
            next: None,
        })
    }

    /// Returns a context with an active entry stored under `key`.
    ///
    /// The entry is applied each time the context is entered.
    #[must_use]
    pub fn with_active<T: ActiveEntry>(&self, key: ContextKey<T>, entry: T) -> Self {
        let entry = Arc::new(entry);
        let active: Arc<dyn ActiveEntry> = entry.clone();
        self.push(Node {
            key: key.id,
            name: key.name,
            value: entry,
            active: Some(active),
            next: None,
        })
    }

    /// Returns a context without the entry stored under `key`.
    #[must_use]
    pub fn without<T>(&self, key: ContextKey<T>) -> Self {
        self.remove(key.id)
    }

    /// Applies `install` to this context.
    #[must_use]
    pub fn transform<F>(&self, install: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        install(self.clone())
    }

    /// Names of the entries, newest first.
    #[must_use]
    pub fn key_names(&self) -> Vec<&'static str> {
        self.nodes().map(|node| node.name).collect()
    }

    /// Returns true if both handles denote the same entries.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (&self.head, &other.head) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Makes this the current context of the thread until the guard drops.
    #[must_use = "the context is left when the guard is dropped"]
    pub fn enter(&self) -> ContextGuard {
        if self.same_as(&Self::current()) {
            return ContextGuard {
                previous: None,
                _not_send: PhantomData,
            };
        }
        ContextGuard {
            previous: Some(switch_to(self.clone())),
            _not_send: PhantomData,
        }
    }

    /// Runs `f` inside this context.
    pub fn run<R, F: FnOnce() -> R>(&self, f: F) -> R {
        let _guard = self.enter();
        f()
    }

    /// Wraps `f` so that it runs inside this context on whichever thread
    /// calls it.
    pub fn wrap<R, F>(&self, f: F) -> impl FnOnce() -> R + Send + 'static
    where
        R: 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let context = self.clone();
        move || context.run(f)
    }

    fn activate(&self) -> Vec<Restore> {
        let mut entries: Vec<(&'static str, Arc<dyn ActiveEntry>)> = self
            .nodes()
            .filter_map(|node| node.active.clone().map(|entry| (node.name, entry)))
            .collect();
        entries.reverse();
        let mut restores = Vec::with_capacity(entries.len());
        for (name, entry) in entries {
            let mut restore = None;
            contain("context activation", || restore = Some(entry.apply()));
            match restore {
                Some(restore) => restores.push(restore),
                None => tracing::warn!(entry = name, "context entry failed to activate"),
            }
        }
        restores
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("entries", &self.key_names())
            .finish()
    }
}

struct Installed {
    context: Context,
    restores: Vec<Restore>,
}

thread_local! {
    static INSTALLED: RefCell<Installed> = const {
        RefCell::new(Installed {
            context: Context::empty(),
            restores: Vec::new(),
        })
    };
}

/// Installs `target` on this thread and returns the context it replaced.
fn switch_to(target: Context) -> Context {
    let Ok((previous, restores)) = INSTALLED.try_with(|installed| {
        let mut installed = installed.borrow_mut();
        let previous = std::mem::replace(&mut installed.context, target.clone());
        (previous, std::mem::take(&mut installed.restores))
    }) else {
        return Context::empty();
    };
    for restore in restores.into_iter().rev() {
        drop(restore);
    }
    let restores = target.activate();
    let _ = INSTALLED.try_with(|installed| installed.borrow_mut().restores = restores);
    previous
}

/// Guard returned by [`Context::enter`]. Reinstalls the previous context
/// on drop.
pub struct ContextGuard {
    previous: Option<Context>,
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            switch_to(previous);
        }
    }
}

impl fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextGuard")
            .field("switched", &self.previous.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn with_and_without_are_persistent() {
        let user = ContextKey::<String>::new("user");
        let depth = ContextKey::<u32>::new("depth");
        let base = Context::empty().with(user, "ana".to_string());
        let deeper = base.with(depth, 2);
        let replaced = deeper.with(user, "bo".to_string());
        let removed = replaced.without(user);

        assert_eq!(base.get(user).as_deref(), Some("ana"));
        assert_eq!(base.get(depth), None);
        assert_eq!(deeper.get(depth), Some(2));
        assert_eq!(replaced.get(user).as_deref(), Some("bo"));
        assert_eq!(replaced.len(), 2);
        assert!(!removed.contains(user));
        assert_eq!(removed.get(depth), Some(2));
        assert_eq!(removed.key_names(), vec!["depth"]);
    }

    #[test]
    fn enter_sets_current_and_restores_on_drop() {
        let key = ContextKey::<&'static str>::new("scope");
        let outer = Context::empty().with(key, "outer");
        let inner = outer.with(key, "inner");
        assert_eq!(Context::current().get(key), None);
        {
            let _outer = outer.enter();
            assert_eq!(Context::current().get(key), Some("outer"));
            inner.run(|| assert_eq!(Context::current().get(key), Some("inner")));
            assert_eq!(Context::current().get(key), Some("outer"));
        }
        assert_eq!(Context::current().get(key), None);
    }

    struct Recording {
        log: Arc<Mutex<Vec<String>>>,
        name: &'static str,
    }

    impl ActiveEntry for Recording {
        fn apply(&self) -> Restore {
            self.log.lock().push(format!("apply {}", self.name));
            let log = Arc::clone(&self.log);
            let name = self.name;
            Restore::new(move || log.lock().push(format!("undo {name}")))
        }
    }

    #[test]
    fn active_entries_apply_oldest_first_and_undo_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = ContextKey::new("first");
        let second = ContextKey::new("second");
        let ctx = Context::empty()
            .with_active(
                first,
                Recording {
                    log: Arc::clone(&log),
                    name: "a",
                },
            )
            .with_active(
                second,
                Recording {
                    log: Arc::clone(&log),
                    name: "b",
                },
            );
        ctx.run(|| log.lock().push("body".to_string()));
        assert_eq!(
            *log.lock(),
            vec!["apply a", "apply b", "body", "undo b", "undo a"]
        );
    }

    #[test]
    fn leaving_is_symmetric_when_the_body_panics() {
        let key = ContextKey::<u8>::new("panic");
        let ctx = Context::empty().with(key, 1);
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| ctx.run(|| panic!("body"))));
        assert!(result.is_err());
        assert_eq!(Context::current().get(key), None);
    }

    #[test]
    fn wrapped_closure_enters_on_another_thread() {
        let key = ContextKey::<u64>::new("request");
        let ctx = Context::empty().with(key, 42);
        let task = ctx.wrap(move || Context::current().get(key));
        let seen = std::thread::spawn(task).join().expect("thread");
        assert_eq!(seen, Some(42));
    }
}
