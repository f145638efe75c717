//! Environment variable and config file support for [`RuntimeConfig`].
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: a config passed to [`init`](super::init)
//! 2. **Environment variables**: values from `VATFLOW_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `VATFLOW_BATCH_SIZE` | `usize` | `batch_size` |
//! | `VATFLOW_DAEMON_THREADS` | `usize` | `daemon_threads` |
//! | `VATFLOW_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `VATFLOW_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `VATFLOW_DAEMON_IDLE_TIMEOUT_MS` | `u64` | `daemon_idle_timeout` |

use super::config::{ConfigError, RuntimeConfig};
use std::time::Duration;

/// Environment variable name for the vat batch size.
pub const ENV_BATCH_SIZE: &str = "VATFLOW_BATCH_SIZE";
/// Environment variable name for the daemon pool thread limit.
pub const ENV_DAEMON_THREADS: &str = "VATFLOW_DAEMON_THREADS";
/// Environment variable name for the thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "VATFLOW_THREAD_NAME_PREFIX";
/// Environment variable name for the thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "VATFLOW_THREAD_STACK_SIZE";
/// Environment variable name for the daemon idle timeout in milliseconds.
pub const ENV_DAEMON_IDLE_TIMEOUT_MS: &str = "VATFLOW_DAEMON_IDLE_TIMEOUT_MS";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    apply_overrides_from(config, read_env)
}

/// Apply overrides using an arbitrary variable lookup.
///
/// [`apply_env_overrides`] calls this with the process environment.
pub fn apply_overrides_from<F>(config: &mut RuntimeConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup(ENV_BATCH_SIZE) {
        config.batch_size = parse_usize(ENV_BATCH_SIZE, &val)?;
    }
    if let Some(val) = lookup(ENV_DAEMON_THREADS) {
        config.daemon_threads = parse_usize(ENV_DAEMON_THREADS, &val)?;
    }
    if let Some(val) = lookup(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = lookup(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = lookup(ENV_DAEMON_IDLE_TIMEOUT_MS) {
        let millis = parse_u64(ENV_DAEMON_IDLE_TIMEOUT_MS, &val)?;
        config.daemon_idle_timeout = Duration::from_millis(millis);
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| invalid(var_name, "unsigned integer", val))
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|_| invalid(var_name, "u64", val))
}

fn invalid(var_name: &str, expected: &'static str, val: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: var_name.to_string(),
        expected,
        value: val.to_string(),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [vat]
/// batch_size = 128
///
/// [daemon]
/// threads = 16
/// thread_name_prefix = "myapp"
/// thread_stack_size = 1048576
/// idle_timeout_ms = 30000
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Vat settings.
    #[serde(default)]
    pub vat: VatToml,
    /// Daemon pool settings.
    #[serde(default)]
    pub daemon: DaemonToml,
}

/// Vat section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct VatToml {
    /// Actions per batch.
    pub batch_size: Option<usize>,
}

/// Daemon pool section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct DaemonToml {
    /// Maximum number of daemon threads.
    pub threads: Option<usize>,
    /// Name prefix for runtime-owned threads.
    pub thread_name_prefix: Option<String>,
    /// Stack size per thread in bytes.
    pub thread_stack_size: Option<usize>,
    /// Idle timeout in milliseconds.
    pub idle_timeout_ms: Option<u64>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) {
    if let Some(v) = toml.vat.batch_size {
        config.batch_size = v;
    }
    if let Some(v) = toml.daemon.threads {
        config.daemon_threads = v;
    }
    if let Some(ref v) = toml.daemon.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(v) = toml.daemon.thread_stack_size {
        config.thread_stack_size = v;
    }
    if let Some(v) = toml.daemon.idle_timeout_ms {
        config.daemon_idle_timeout = Duration::from_millis(v);
    }
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_toml_str(&content)
}

/// Loads defaults, then the TOML file, then environment overrides.
#[cfg(feature = "config-file")]
pub fn load_config(path: &std::path::Path) -> Result<RuntimeConfig, ConfigError> {
    let mut config = RuntimeConfig::default();
    apply_toml_config(&mut config, &parse_toml_file(path)?);
    apply_env_overrides(&mut config)?;
    config.normalize();
    Ok(config)
}

// =========================================================================
// Tests
// =========================================================================
