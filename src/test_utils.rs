//! Test utilities for vatflow.
//!
//! Shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A driver that runs a flow to completion with logging enabled
//! - Outcome assertion macros
//! - A closeable resource that records its close order
//!
//! # Example
//! ```
//! use vatflow::test_utils::{init_test_logging, run_test};
//!
//! init_test_logging();
//! let value = run_test(|| vatflow::a_value(3));
//! assert_eq!(value, 3);
//! ```

use crate::combinator::{AsyncCloseable, a_failure, a_void};
use crate::error::Error;
use crate::promise::Promise;
use crate::runtime::block_on;
use crate::types::Value;
use parking_lot::Mutex;
use std::sync::{Arc, Once};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Runs `body` on a fresh vat until its promise resolves and returns the
/// value, panicking with the error otherwise.
pub fn run_test<T, F>(body: F) -> T
where
    T: Value,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    init_test_logging();
    match block_on(body) {
        Ok(value) => value,
        Err(error) => panic!("test flow failed: {error}"),
    }
}

/// Runs `body` like [`run_test`] and returns the failure, panicking if the
/// flow succeeded.
pub fn run_test_failure<T, F>(body: F) -> Error
where
    T: Value + std::fmt::Debug,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    init_test_logging();
    match block_on(body) {
        Ok(value) => panic!("expected the flow to fail, got {value:?}"),
        Err(error) => error,
    }
}

/// Shared, ordered record of events for tests.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    /// Copy of the events so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

/// Resource that logs `close:<name>` and optionally fails to close.
#[derive(Debug, Clone)]
pub struct TrackedResource {
    name: String,
    log: EventLog,
    close_error: Option<String>,
}

impl TrackedResource {
    /// A resource that closes cleanly.
    pub fn new(name: impl Into<String>, log: &EventLog) -> Self {
        Self {
            name: name.into(),
            log: log.clone(),
            close_error: None,
        }
    }

    /// A resource whose close fails with `message`.
    pub fn failing(name: impl Into<String>, log: &EventLog, message: impl Into<String>) -> Self {
        Self {
            close_error: Some(message.into()),
            ..Self::new(name, log)
        }
    }

    /// The resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AsyncCloseable for TrackedResource {
    fn close(&self) -> Promise<()> {
        self.log.push(format!("close:{}", self.name));
        match &self.close_error {
            Some(message) => a_failure(Error::user(message.clone())),
            None => a_void(),
        }
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that an outcome is a success with a specific value.
#[macro_export]
macro_rules! assert_outcome_success {
    ($outcome:expr, $expected:expr) => {
        match $outcome {
            $crate::types::Outcome::Success(v) => assert_eq!(v, $expected),
            other => unreachable!("expected Outcome::Success({:?}), got {:?}", $expected, other),
        }
    };
}

/// Assert that an outcome is a failure of a specific kind.
#[macro_export]
macro_rules! assert_outcome_failure {
    ($outcome:expr, $kind:expr) => {
        match $outcome {
            $crate::types::Outcome::Failure(e) => assert_eq!(e.kind(), $kind),
            other => unreachable!("expected Outcome::Failure({:?}), got {:?}", $kind, other),
        }
    };
}
