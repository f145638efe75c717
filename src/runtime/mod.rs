//! Vats and the machinery that runs them.
//!
//! - [`vat`]: Vat handles, identity, the current-vat marker, and [`VatBackend`]
//! - [`batched`]: Batched action queue with a single scheduling flag
//! - [`single_thread`]: Vat driven by one thread (dedicated or the caller's)
//! - [`executor`]: Vats that borrow threads from an [`Executor`]
//! - [`pool`]: The daemon thread pool
//! - [`direct`]: The direct vat and the per-thread trampoline
//! - [`block_on`](mod@block_on): Run a computation to completion on the calling thread
//! - [`config`] / [`env_config`]: Runtime configuration

pub mod batched;
pub mod block_on;
pub mod config;
pub mod direct;
pub mod env_config;
pub mod executor;
pub mod pool;
pub mod single_thread;
pub mod vat;

pub use batched::BatchedQueue;
pub use block_on::{block_on, block_on_outcome};
pub use config::{ConfigError, RuntimeConfig};
pub use direct::direct_vat;
pub use executor::{Executor, daemon_vat, executor_vat, new_daemon_vat};
pub use pool::{DaemonPool, daemon_pool};
pub use single_thread::{SingleThreadVat, VatState, VatStopper};
pub use vat::{Action, Vat, VatBackend, VatGuard, VatId};

pub(crate) use direct::trampoline;

use crate::error::panic_message;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::OnceLock;

static RUNTIME_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Returns the process-wide runtime configuration.
///
/// Unless [`init`] ran first, the configuration is built from defaults and
/// `VATFLOW_*` environment overrides on first use. An invalid override is
/// logged and the defaults are kept.
pub fn runtime_config() -> &'static RuntimeConfig {
    RUNTIME_CONFIG.get_or_init(|| {
        RuntimeConfig::from_env().unwrap_or_else(|error| {
            tracing::warn!(%error, "ignoring invalid runtime environment overrides");
            RuntimeConfig::default()
        })
    })
}

/// Installs an explicit runtime configuration.
///
/// Must run before any vat, pool, or timer is created.
pub fn init(config: RuntimeConfig) -> Result<(), ConfigError> {
    let mut config = config;
    config.normalize();
    let summary = (config.batch_size, config.daemon_threads);
    RUNTIME_CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    tracing::debug!(
        batch_size = summary.0,
        daemon_threads = summary.1,
        "runtime configuration installed"
    );
    Ok(())
}

pub(crate) fn default_batch_size() -> usize {
    runtime_config().batch_size
}

pub(crate) fn thread_name_prefix() -> &'static str {
    &runtime_config().thread_name_prefix
}

/// Runs a scheduled action, logging and containing a panic.
pub(crate) fn run_contained(action: Action, origin: &str) {
    contain(origin, action);
}

/// Runs `f`, logging and containing a panic.
pub(crate) fn contain<F: FnOnce()>(origin: &str, f: F) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!(
            origin,
            panic = %panic_message(&*payload),
            "scheduled action panicked"
        );
    }
}
