//! `tracing` span entry.

use crate::context::{ActiveEntry, Context, ContextKey, Restore};
use std::sync::LazyLock;

static SPAN_KEY: LazyLock<ContextKey<SpanEntry>> = LazyLock::new(|| ContextKey::new("span"));

/// The context key under which the flow's span is stored.
pub fn span_key() -> ContextKey<SpanEntry> {
    *SPAN_KEY
}

/// Enters a span around every continuation of the flow.
#[derive(Debug, Clone)]
pub struct SpanEntry(pub tracing::Span);

impl ActiveEntry for SpanEntry {
    fn apply(&self) -> Restore {
        let entered = self.0.clone().entered();
        Restore::new(move || drop(entered))
    }
}

/// Returns `context` with `span` entered around every continuation.
#[must_use]
pub fn with_span(context: &Context, span: tracing::Span) -> Context {
    context.with_active(span_key(), SpanEntry(span))
}
