//! Worker pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Smallest stack size accepted for worker threads.
const MIN_STACK_SIZE: usize = 64 * 1024;

fn default_max_threads() -> usize {
    num_cpus::get()
}

fn default_thread_name_prefix() -> String {
    "offload-worker".into()
}

const fn default_join_timeout_ms() -> u64 {
    2_000
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on live worker threads. Defaults to the number of logical CPUs.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    /// Stack size for worker threads; `None` keeps the platform default.
    #[serde(default)]
    pub thread_stack_size: Option<usize>,
    /// Worker threads are named `{prefix}-{id}`.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// How long `shutdown` waits for each worker before detaching it.
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            thread_stack_size: None,
            thread_name_prefix: default_thread_name_prefix(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of worker threads.
    #[must_use]
    pub const fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Set the worker thread stack size in bytes.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the per-worker join timeout used by `shutdown`.
    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Per-worker join timeout.
    #[must_use]
    pub const fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_threads == 0 {
            return Err("max_threads must be greater than 0".into());
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        if let Some(size) = self.thread_stack_size {
            if size < MIN_STACK_SIZE {
                return Err(format!("thread_stack_size must be at least {MIN_STACK_SIZE} bytes"));
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a message on malformed JSON or invalid values.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the environment, reading a `.env` file first
    /// if one exists.
    ///
    /// Recognized variables: `OFFLOAD_MAX_THREADS`, `OFFLOAD_STACK_SIZE`,
    /// `OFFLOAD_THREAD_PREFIX`. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns a message if a variable does not parse or the result is invalid.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        let mut cfg = Self::default();
        if let Some(value) = env_var("OFFLOAD_MAX_THREADS") {
            cfg.max_threads = value
                .parse()
                .map_err(|e| format!("OFFLOAD_MAX_THREADS: {e}"))?;
        }
        if let Some(value) = env_var("OFFLOAD_STACK_SIZE") {
            cfg.thread_stack_size = Some(
                value
                    .parse()
                    .map_err(|e| format!("OFFLOAD_STACK_SIZE: {e}"))?,
            );
        }
        if let Some(value) = env_var("OFFLOAD_THREAD_PREFIX") {
            cfg.thread_name_prefix = value;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_hardware_concurrency() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_threads, num_cpus::get());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let cfg = EngineConfig::new()
            .with_max_threads(3)
            .with_thread_stack_size(256 * 1024)
            .with_thread_name_prefix("loader")
            .with_join_timeout(Duration::from_millis(500));
        assert_eq!(cfg.max_threads, 3);
        assert_eq!(cfg.thread_stack_size, Some(256 * 1024));
        assert_eq!(cfg.thread_name_prefix, "loader");
        assert_eq!(cfg.join_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_validate_rejects_tiny_stack() {
        let cfg = EngineConfig::new().with_thread_stack_size(1024);
        assert!(cfg.validate().is_err());
    }
}
