//! Process-level configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{CachetError, CachetResult, ConfigError};
use crate::key::DEFAULT_MAX_KEY_LENGTH;

/// Master configuration shared by every coordinator in a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachetConfig {
    /// Global kill switch: coordinators call the data source directly and
    /// never touch the store.
    pub disabled: bool,
    /// TTL used when per-call options carry none (0 = never expires).
    pub default_ttl_seconds: u32,
    /// Longest accepted cache key, in bytes.
    pub max_key_length: usize,
    /// Deadline applied by `TimeoutStore` to each store operation.
    pub store_timeout_ms: u64,
}

impl Default for CachetConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            default_ttl_seconds: 3600, // 1 hour
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            store_timeout_ms: 500,
        }
    }
}

impl CachetConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable caching globally.
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, seconds: u32) -> Self {
        self.default_ttl_seconds = seconds;
        self
    }

    /// Set the maximum key length.
    pub fn with_max_key_length(mut self, max: usize) -> Self {
        self.max_key_length = max;
        self
    }

    /// Set the per-operation store timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The store timeout as a `Duration`.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> CachetResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| {
            CachetError::Config(ConfigError::InvalidValue {
                field: "config".to_string(),
                value: String::new(),
                reason: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> CachetResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            CachetError::Config(ConfigError::InvalidValue {
                field: "config_path".to_string(),
                value: path.display().to_string(),
                reason: e.to_string(),
            })
        })?;
        Self::from_toml_str(&source)
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(CachetError::Config) if invalid.
    ///
    /// Validates:
    /// - max_key_length leaves room for a namespace, separator and id
    /// - store_timeout_ms > 0
    pub fn validate(&self) -> CachetResult<()> {
        if self.max_key_length < 3 {
            return Err(CachetError::Config(ConfigError::InvalidValue {
                field: "max_key_length".to_string(),
                value: self.max_key_length.to_string(),
                reason: "max_key_length must be at least 3".to_string(),
            }));
        }

        if self.store_timeout_ms == 0 {
            return Err(CachetError::Config(ConfigError::InvalidValue {
                field: "store_timeout_ms".to_string(),
                value: self.store_timeout_ms.to_string(),
                reason: "store_timeout_ms must be positive".to_string(),
            }));
        }

        Ok(())
    }
}
