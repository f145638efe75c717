//! Diagnostic tags carried by the ambient context.
//!
//! [`DiagnosticTags`] is a small string map. Entering a context that holds
//! one pushes it on a thread-local stack; [`DiagnosticTags::current`] reads
//! the top of that stack. Leaving removes exactly the pushed entry, even if
//! guards are dropped out of order.

use crate::context::{ActiveEntry, Context, ContextKey, Restore};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone)]
struct TagStackEntry {
    id: u64,
    tags: DiagnosticTags,
}

thread_local! {
    static TAG_STACK: RefCell<Vec<TagStackEntry>> = const { RefCell::new(Vec::new()) };
}

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

static DIAGNOSTIC_KEY: LazyLock<ContextKey<DiagnosticTags>> =
    LazyLock::new(|| ContextKey::new("diagnostic-tags"));

/// The context key under which [`DiagnosticTags`] are stored.
pub fn diagnostic_key() -> ContextKey<DiagnosticTags> {
    *DIAGNOSTIC_KEY
}

/// String tags attached to log output of a flow.
///
/// Value semantics: modifying a clone does not affect the original.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticTags {
    tags: BTreeMap<String, String>,
}

impl DiagnosticTags {
    /// Creates an empty tag map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with `key` set to `value`.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Gets a tag.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Iterates over the tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns true if there are no tags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// The tags applied on this thread, or an empty map.
    #[must_use]
    pub fn current() -> Self {
        TAG_STACK
            .try_with(|stack| {
                stack
                    .borrow()
                    .last()
                    .map_or_else(Self::new, |entry| entry.tags.clone())
            })
            .unwrap_or_default()
    }
}

impl ActiveEntry for DiagnosticTags {
    fn apply(&self) -> Restore {
        let id = NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed);
        TAG_STACK.with(|stack| {
            stack.borrow_mut().push(TagStackEntry {
                id,
                tags: self.clone(),
            });
        });
        Restore::new(move || {
            let _ = TAG_STACK.try_with(|stack| {
                let mut stack = stack.borrow_mut();
                if let Some(pos) = stack.iter().rposition(|entry| entry.id == id) {
                    stack.remove(pos);
                }
            });
        })
    }
}

/// Returns `context` with the diagnostic tag `key` set to `value`.
#[must_use]
pub fn with_tag(context: &Context, key: impl Into<String>, value: impl Into<String>) -> Context {
    let tags = context
        .get(diagnostic_key())
        .unwrap_or_default()
        .with_tag(key, value);
    context.with_active(diagnostic_key(), tags)
}

/// Reads a diagnostic tag applied on this thread.
#[must_use]
pub fn current_tag(key: &str) -> Option<String> {
    DiagnosticTags::current().get(key).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_accumulate_in_context() {
        let ctx = with_tag(&Context::empty(), "request", "r1");
        let ctx = with_tag(&ctx, "tenant", "acme");
        let tags = ctx.get(diagnostic_key()).expect("tags");
        assert_eq!(tags.get("request"), Some("r1"));
        assert_eq!(tags.iter().count(), 2);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn entering_sets_current_and_restores_on_leave() {
        assert!(DiagnosticTags::current().is_empty());
        let outer = with_tag(&Context::empty(), "scope", "outer");
        let inner = with_tag(&outer, "scope", "inner");
        outer.run(|| {
            assert_eq!(current_tag("scope").as_deref(), Some("outer"));
            inner.run(|| assert_eq!(current_tag("scope").as_deref(), Some("inner")));
            assert_eq!(current_tag("scope").as_deref(), Some("outer"));
        });
        assert_eq!(current_tag("scope"), None);
    }

    #[test]
    fn out_of_order_restore_keeps_top() {
        let outer = DiagnosticTags::new().with_tag("scope", "outer").apply();
        let middle = DiagnosticTags::new().with_tag("scope", "middle").apply();
        let inner = DiagnosticTags::new().with_tag("scope", "inner").apply();
        drop(middle);
        assert_eq!(current_tag("scope").as_deref(), Some("inner"));
        drop(inner);
        assert_eq!(current_tag("scope").as_deref(), Some("outer"));
        drop(outer);
        assert!(DiagnosticTags::current().is_empty());
    }
}
