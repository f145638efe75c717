//! Runtime configuration.
//!
//! [`RuntimeConfig`] carries the knobs shared by the vats and the daemon pool.
//! Values are resolved from defaults, then an optional TOML file (with the
//! `config-file` feature), then `VATFLOW_*` environment variables; see
//! [`env_config`](super::env_config).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of actions a batched vat runs before yielding its thread.
pub const DEFAULT_BATCH_SIZE: usize = 256;
/// Default upper bound on daemon pool threads.
pub const DEFAULT_DAEMON_THREADS: usize = 64;
/// Default name prefix for runtime-owned threads.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "vatflow";
/// Default stack size for runtime-owned threads.
pub const DEFAULT_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;
/// Default time an idle daemon thread waits for work before exiting.
pub const DEFAULT_DAEMON_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors produced while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable or field had an unparseable value.
    #[error("invalid value for {name}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// Variable or field name.
        name: String,
        /// Description of the accepted values.
        expected: &'static str,
        /// The rejected raw value.
        value: String,
    },
    /// A config file could not be read.
    #[error("failed to read config file {path}: {message}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying I/O error description.
        message: String,
    },
    /// A config file could not be parsed.
    #[error("failed to parse TOML config: {0}")]
    Parse(String),
    /// The daemon pool was already started with another configuration.
    #[error("daemon pool already initialized")]
    AlreadyInitialized,
}

/// Configuration for vats and the daemon pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Actions run per batch by batched vats before rescheduling.
    pub batch_size: usize,
    /// Maximum number of daemon pool threads.
    pub daemon_threads: usize,
    /// Name prefix for daemon, timer, and dedicated vat threads.
    pub thread_name_prefix: String,
    /// Stack size for runtime-owned threads, in bytes.
    pub thread_stack_size: usize,
    /// Idle time after which a daemon thread exits.
    #[serde(with = "duration_millis")]
    pub daemon_idle_timeout: Duration,
}

impl RuntimeConfig {
    /// Clamps values into their usable ranges.
    pub fn normalize(&mut self) {
        if self.batch_size == 0 {
            self.batch_size = 1;
        }
        if self.daemon_threads == 0 {
            self.daemon_threads = 1;
        }
        if self.thread_name_prefix.trim().is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
    }

    /// Builds a configuration from defaults and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        super::env_config::apply_env_overrides(&mut config)?;
        config.normalize();
        Ok(config)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            daemon_threads: DEFAULT_DAEMON_THREADS,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
            daemon_idle_timeout: DEFAULT_DAEMON_IDLE_TIMEOUT,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
