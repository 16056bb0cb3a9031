//! Per-call caching options.
//!
//! These replace the per-method annotation attributes of declarative
//! caching: each coordinator call receives an explicit, immutable
//! [`CacheOptions`] value.

use serde::{Deserialize, Serialize};

use crate::error::{CachetResult, ConfigError};

/// How best-effort write-back is scheduled.
///
/// Neither mode lets a failed write fail the call. They differ in latency:
/// `Inline` makes the caller wait for every write in turn, each bounded only
/// by the store's own timeout, while `Detached` returns as soon as the
/// result is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteBack {
    /// Writes run sequentially inside the call, before it returns. Later
    /// reads in the same task are guaranteed to see them.
    #[default]
    Inline,
    /// Writes are spawned on the async runtime and complete independently
    /// of the caller.
    Detached,
}

/// When an invalidation runs relative to the wrapped computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidateTiming {
    /// Delete before the computation runs.
    Before,
    /// Delete after the computation succeeds.
    #[default]
    After,
}

/// Options supplied with every coordinator call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Namespace prefixed to every key (required).
    pub namespace: String,
    /// Expiration in seconds; `None` uses the configured default, `0` never expires.
    #[serde(default)]
    pub ttl_seconds: Option<u32>,
    /// Persist "no value" results as the null sentinel.
    #[serde(default)]
    pub add_nulls_to_cache: bool,
    /// Drop "no value" results from batch output instead of yielding `None`.
    #[serde(default)]
    pub skip_nulls_in_result: bool,
    /// Derive keys from returned values rather than from the input objects.
    #[serde(default)]
    pub generate_keys_from_result: bool,
    /// Skip the cache read and go straight to the data source.
    #[serde(default)]
    pub read_directly_from_store: bool,
    /// Scheduling of best-effort writes. The default, [`WriteBack::Inline`],
    /// adds one store round-trip per written key to the call's latency; use
    /// [`WriteBack::Detached`] on latency-sensitive paths.
    #[serde(default)]
    pub write_back: WriteBack,
}

impl CacheOptions {
    /// Options for a namespace with every flag off.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ttl_seconds: None,
            add_nulls_to_cache: false,
            skip_nulls_in_result: false,
            generate_keys_from_result: false,
            read_directly_from_store: false,
            write_back: WriteBack::Inline,
        }
    }

    /// Set the expiration in seconds.
    pub fn with_ttl(mut self, seconds: u32) -> Self {
        self.ttl_seconds = Some(seconds);
        self
    }

    /// Cache null results as the sentinel.
    pub fn with_add_nulls_to_cache(mut self, enabled: bool) -> Self {
        self.add_nulls_to_cache = enabled;
        self
    }

    /// Omit null results from batch output.
    pub fn with_skip_nulls_in_result(mut self, enabled: bool) -> Self {
        self.skip_nulls_in_result = enabled;
        self
    }

    /// Derive keys from returned values.
    pub fn with_generate_keys_from_result(mut self, enabled: bool) -> Self {
        self.generate_keys_from_result = enabled;
        self
    }

    /// Bypass the cache read.
    pub fn with_read_directly_from_store(mut self, enabled: bool) -> Self {
        self.read_directly_from_store = enabled;
        self
    }

    /// Set the write-back scheduling.
    pub fn with_write_back(mut self, write_back: WriteBack) -> Self {
        self.write_back = write_back;
        self
    }

    /// Resolve the effective TTL against a default.
    pub fn ttl_or(&self, default_seconds: u32) -> u32 {
        self.ttl_seconds.unwrap_or(default_seconds)
    }

    /// Validate the options.
    ///
    /// Key-level validation (characters, length) happens when keys are
    /// built; this only checks what can be known up front.
    pub fn validate(&self) -> CachetResult<()> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "namespace".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
