//! Error types and error handling strategy for Vatflow.
//!
//! Every failure that travels through a promise is an [`Error`]. Errors are
//! cheap to clone because every listener of a failed promise receives its own
//! copy of the failure.
//!
//! # Error Categories
//!
//! - **Usage**: Programming errors surfaced to the caller (double resolution,
//!   no current vat, overlapping reads on a single-consumer stream)
//! - **Computation**: Failures produced by user code, panics captured at a
//!   callback boundary, abandoned resolvers, and timeouts
//! - **Resource**: Operations on closed or invalidated resources and failed
//!   close actions
//! - **Config**: Invalid runtime configuration
//!
//! Panics inside user callbacks never unwind through the runtime: they are
//! caught at the boundary and turned into [`ErrorKind::Panicked`] failures.
//! When two failures meet (a body failure and a close failure, or several
//! failed branches of a parallel flow) one wins and the others are attached
//! as [`suppressed`](Error::suppressed) errors.

use core::fmt;
use std::any::Any;
use std::sync::Arc;

use crate::runtime::config::ConfigError;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Usage ===
    /// A promise was resolved a second time.
    DoubleResolution,
    /// An operation required a current vat and none is active on this thread.
    NoVat,
    /// A vat was entered while another vat is active on this thread, or while
    /// it is running on another thread.
    VatAlreadyActive,
    /// The vat has been stopped and accepts no further work.
    VatStopped,
    /// A single-consumer stream received overlapping reads.
    ConcurrentRead,
    /// An argument was outside its valid range.
    InvalidArgument,
    /// An operation was invoked in a state that does not allow it.
    IllegalState,

    // === Computation ===
    /// User-provided failure.
    User,
    /// A user callback panicked.
    Panicked,
    /// Every resolver of a pending promise was dropped without resolving it.
    ResolverDropped,
    /// An operation did not complete before its deadline.
    Timeout,

    // === Resource ===
    /// The resource is closed or was invalidated.
    ResourceClosed,
    /// A close action failed.
    CloseFailed,

    // === Config ===
    /// Runtime configuration could not be applied.
    Config,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::DoubleResolution
            | Self::NoVat
            | Self::VatAlreadyActive
            | Self::VatStopped
            | Self::ConcurrentRead
            | Self::InvalidArgument
            | Self::IllegalState => ErrorCategory::Usage,
            Self::User | Self::Panicked | Self::ResolverDropped | Self::Timeout => {
                ErrorCategory::Computation
            }
            Self::ResourceClosed | Self::CloseFailed => ErrorCategory::Resource,
            Self::Config => ErrorCategory::Config,
        }
    }

    /// Short human-readable description used by `Display`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DoubleResolution => "promise already resolved",
            Self::NoVat => "no current vat",
            Self::VatAlreadyActive => "vat already active",
            Self::VatStopped => "vat stopped",
            Self::ConcurrentRead => "concurrent read on single-consumer stream",
            Self::InvalidArgument => "invalid argument",
            Self::IllegalState => "illegal state",
            Self::User => "failure",
            Self::Panicked => "callback panicked",
            Self::ResolverDropped => "resolver dropped without resolving",
            Self::Timeout => "timed out",
            Self::ResourceClosed => "resource closed",
            Self::CloseFailed => "close failed",
            Self::Config => "invalid configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Programming errors in the use of the runtime.
    Usage,
    /// Failures of the computation itself.
    Computation,
    /// Resource lifecycle failures.
    Resource,
    /// Configuration failures.
    Config,
}

/// The main error type for Vatflow operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    label: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    suppressed: Vec<Self>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            label: None,
            source: None,
            suppressed: Vec::new(),
        }
    }

    /// Creates a user failure with a message.
    #[must_use]
    pub fn user(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(msg)
    }

    /// Wraps a foreign error as a user failure, keeping it as the source.
    #[must_use]
    pub fn wrap(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        let message = source.to_string();
        Self::new(ErrorKind::User)
            .with_message(message)
            .with_source(source)
    }

    /// Creates a failure from a captured panic payload.
    #[must_use]
    pub fn panicked(payload: &(dyn Any + Send)) -> Self {
        Self::new(ErrorKind::Panicked).with_message(panic_message(payload))
    }

    /// Creates a double-resolution usage error.
    #[must_use]
    pub fn double_resolution() -> Self {
        Self::new(ErrorKind::DoubleResolution)
    }

    /// Creates a usage error for operations that need a current vat.
    #[must_use]
    pub fn no_vat() -> Self {
        Self::new(ErrorKind::NoVat)
    }

    /// Creates an overlapping-read usage error.
    #[must_use]
    pub fn concurrent_read() -> Self {
        Self::new(ErrorKind::ConcurrentRead)
    }

    /// Creates an error for operations on a closed resource.
    #[must_use]
    pub fn resource_closed() -> Self {
        Self::new(ErrorKind::ResourceClosed)
    }

    /// Creates an illegal-state usage error.
    #[must_use]
    pub fn illegal_state(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalState).with_message(detail)
    }

    /// Creates an invalid-argument usage error.
    #[must_use]
    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument).with_message(detail)
    }

    /// Creates a timeout failure.
    #[must_use]
    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Attaches the label of the operation that re-raised this failure.
    #[must_use]
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Attaches a secondary failure that lost to this one.
    pub fn add_suppressed(&mut self, other: Self) {
        self.suppressed.push(other);
    }

    /// Builder form of [`add_suppressed`](Self::add_suppressed).
    #[must_use]
    pub fn with_suppressed(mut self, other: Self) -> Self {
        self.add_suppressed(other);
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this error reports a misuse of the runtime.
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::Usage)
    }

    /// Returns true if this is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the operation label, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Returns failures that were suppressed in favor of this one.
    #[must_use]
    pub fn suppressed(&self) -> &[Self] {
        &self.suppressed
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.message == other.message
            && self.label == other.label
            && self.suppressed == other.suppressed
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.label {
            write!(f, "{label}: ")?;
        }
        match &self.message {
            Some(msg) if self.kind == ErrorKind::User => write!(f, "{msg}")?,
            Some(msg) => write!(f, "{}: {msg}", self.kind)?,
            None => write!(f, "{}", self.kind)?,
        }
        if !self.suppressed.is_empty() {
            write!(f, " (+{} suppressed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        let message = e.to_string();
        Self::new(ErrorKind::Config)
            .with_message(message)
            .with_source(e)
    }
}

/// A specialized Result type for Vatflow operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
