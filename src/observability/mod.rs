//! Observability entries for [`Context`](crate::Context).
//!
//! Both entries are *active*: they follow a computation from vat to vat and
//! are applied around every continuation.
//!
//! - [`diagnostic`]: Diagnostic tags (request ids, tenants, ...) readable from
//!   any continuation through [`DiagnosticTags::current`]
//! - [`span`]: A `tracing` span re-entered around every continuation, so log
//!   lines emitted later still belong to the span that started the flow

pub mod diagnostic;
pub mod span;

pub use diagnostic::{DiagnosticTags, current_tag, diagnostic_key, with_tag};
pub use span::{SpanEntry, span_key, with_span};
