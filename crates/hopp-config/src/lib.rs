#![warn(missing_docs)]

//! # hopp-config
//!
//! Configuration loading for the Hoppscotch script sandbox.
//!
//! Supports TOML configuration files with environment variable expansion.
//!
//! ## Example
//!
//! ```toml
//! [sandbox]
//! timeout_secs = 30
//! max_heap_mb = 64
//! max_concurrent = 8
//! max_fetch_calls = 50
//! drain_idle_rounds = 3
//! drain_poll_interval_ms = 10
//!
//! [fetch]
//! timeout_secs = ${HOPP_FETCH_TIMEOUT}
//! ```

use std::path::Path;
use std::time::Duration;

use hopp_sandbox::{DrainPolicy, SandboxConfig};
use serde::Deserialize;
use thiserror::Error;

/// Errors from config parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HoppConfig {
    /// Script sandbox settings.
    #[serde(default)]
    pub sandbox: SandboxOverrides,

    /// Fetch transport settings.
    #[serde(default)]
    pub fetch: FetchOverrides,
}

/// Sandbox configuration overrides. Unset fields keep the sandbox defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SandboxOverrides {
    /// Run deadline in seconds. Absent means no deadline.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Maximum V8 heap size in megabytes.
    #[serde(default)]
    pub max_heap_mb: Option<usize>,

    /// Maximum concurrent runs.
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Maximum `fetch()` calls per run.
    #[serde(default)]
    pub max_fetch_calls: Option<usize>,

    /// Maximum script size in kilobytes.
    #[serde(default)]
    pub max_script_size_kb: Option<usize>,

    /// Maximum console entries kept per run.
    #[serde(default)]
    pub max_console_entries: Option<usize>,

    /// Consecutive idle observations before the bridge counts as drained.
    #[serde(default)]
    pub drain_idle_rounds: Option<u32>,

    /// Delay between drain observations in milliseconds.
    #[serde(default)]
    pub drain_poll_interval_ms: Option<u64>,
}

/// Fetch transport overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchOverrides {
    /// Per-request timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Fetch timeout used when none is configured.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

impl HoppConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: HoppConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str);
        Self::from_toml(&expanded)
    }

    /// Load config from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    /// Build the sandbox configuration, starting from its defaults.
    pub fn sandbox_config(&self) -> SandboxConfig {
        let defaults = SandboxConfig::default();
        let o = &self.sandbox;
        SandboxConfig {
            timeout: o.timeout_secs.map(Duration::from_secs),
            max_script_size: o
                .max_script_size_kb
                .map(|kb| kb * 1024)
                .unwrap_or(defaults.max_script_size),
            max_heap_size: o
                .max_heap_mb
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(defaults.max_heap_size),
            max_concurrent: o.max_concurrent.unwrap_or(defaults.max_concurrent),
            max_fetch_calls: o.max_fetch_calls.unwrap_or(defaults.max_fetch_calls),
            max_console_entries: o
                .max_console_entries
                .unwrap_or(defaults.max_console_entries),
            drain: DrainPolicy {
                idle_rounds: o.drain_idle_rounds.unwrap_or(defaults.drain.idle_rounds),
                poll_interval: o
                    .drain_poll_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.drain.poll_interval),
            },
        }
    }

    /// Per-request timeout for the fetch transport.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_FETCH_TIMEOUT)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sandbox;
        let positive = [
            ("sandbox.timeout_secs", s.timeout_secs.map(|v| v as usize)),
            ("sandbox.max_heap_mb", s.max_heap_mb),
            ("sandbox.max_concurrent", s.max_concurrent),
            ("sandbox.max_script_size_kb", s.max_script_size_kb),
            ("sandbox.drain_idle_rounds", s.drain_idle_rounds.map(|v| v as usize)),
            ("fetch.timeout_secs", self.fetch.timeout_secs.map(|v| v as usize)),
        ];
        for (name, value) in positive {
            if value == Some(0) {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string using environment variables.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                // unresolved placeholders stay as written
                Err(_) => result.push_str(&format!("${{{var_name}}}")),
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_sandbox_defaults() {
        let config = HoppConfig::from_toml("").unwrap();
        let sandbox = config.sandbox_config();
        let defaults = SandboxConfig::default();
        assert!(sandbox.timeout.is_none());
        assert_eq!(sandbox.max_heap_size, defaults.max_heap_size);
        assert_eq!(sandbox.drain, DrainPolicy::default());
        assert_eq!(config.fetch_timeout(), DEFAULT_FETCH_TIMEOUT);
    }

    #[test]
    fn config_parses_sandbox_overrides() {
        let toml = r#"
            [sandbox]
            timeout_secs = 10
            max_heap_mb = 128
            max_concurrent = 4
            max_fetch_calls = 100
            max_script_size_kb = 64
            drain_idle_rounds = 5
            drain_poll_interval_ms = 25
        "#;

        let config = HoppConfig::from_toml(toml).unwrap();
        let sandbox = config.sandbox_config();
        assert_eq!(sandbox.timeout, Some(Duration::from_secs(10)));
        assert_eq!(sandbox.max_heap_size, 128 * 1024 * 1024);
        assert_eq!(sandbox.max_concurrent, 4);
        assert_eq!(sandbox.max_fetch_calls, 100);
        assert_eq!(sandbox.max_script_size, 64 * 1024);
        assert_eq!(sandbox.drain.idle_rounds, 5);
        assert_eq!(sandbox.drain.poll_interval, Duration::from_millis(25));
    }

    #[test]
    fn config_parses_fetch_section() {
        let toml = r#"
            [fetch]
            timeout_secs = 5
        "#;

        let config = HoppConfig::from_toml(toml).unwrap();
        assert_eq!(config.fetch_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn config_rejects_zero_limits() {
        let err = HoppConfig::from_toml("[sandbox]\nmax_concurrent = 0").unwrap_err();
        assert!(err.to_string().contains("sandbox.max_concurrent"), "{err}");

        let err = HoppConfig::from_toml("[sandbox]\ndrain_idle_rounds = 0").unwrap_err();
        assert!(err.to_string().contains("drain_idle_rounds"), "{err}");
    }

    #[test]
    fn config_rejects_unparseable_toml() {
        let err = HoppConfig::from_toml("[sandbox\ntimeout_secs = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn config_expands_environment_variables() {
        std::env::set_var("HOPP_TEST_FETCH_TIMEOUT", "7");
        let toml = r#"
            [fetch]
            timeout_secs = ${HOPP_TEST_FETCH_TIMEOUT}
        "#;

        let config = HoppConfig::from_toml_with_env(toml).unwrap();
        assert_eq!(config.fetch_timeout(), Duration::from_secs(7));
        std::env::remove_var("HOPP_TEST_FETCH_TIMEOUT");
    }

    #[test]
    fn config_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hopp.toml");
        std::fs::write(
            &path,
            r#"
            [sandbox]
            max_fetch_calls = 3
        "#,
        )
        .unwrap();

        let config = HoppConfig::from_file(&path).unwrap();
        assert_eq!(config.sandbox_config().max_fetch_calls, 3);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = HoppConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn env_var_expansion_preserves_unresolved() {
        let result = expand_env_vars("prefix ${DEFINITELY_NOT_SET_12345} suffix");
        assert_eq!(result, "prefix ${DEFINITELY_NOT_SET_12345} suffix");
    }
}
