//! Error types for cachet operations

use std::time::Duration;
use thiserror::Error;

/// Cache store errors.
///
/// "Not found" is never an error: stores report absence as `Ok(None)` or
/// as a key missing from a bulk result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store operation {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Store transport failure: {reason}")]
    Transport { reason: String },
}

impl StoreError {
    /// Build a transport error from anything printable.
    pub fn transport(reason: impl ToString) -> Self {
        Self::Transport {
            reason: reason.to_string(),
        }
    }

    /// Returns true if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, value: impl Into<String>, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

/// The data source returned something the coordinator cannot align with
/// the keys it asked for.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconciliationError {
    #[error("Result length mismatch: expected {expected} values, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("No cache entry resolved for key {key}")]
    MissingEntry { key: String },
}

/// Serialization errors for cache entries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode cache entry: {reason}")]
    Encode { reason: String },

    #[error("Failed to decode cache entry: {reason}")]
    Decode { reason: String },
}

/// Master error type for all cachet errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CachetError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Reconciliation error: {0}")]
    Reconciliation(#[from] ReconciliationError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type alias for cachet operations.
pub type CachetResult<T> = Result<T, CachetError>;

/// Result type alias for cache store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_timeout() {
        let err = StoreError::Timeout {
            operation: "get_bulk",
            timeout: Duration::from_millis(250),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("get_bulk"));
        assert!(msg.contains("250ms"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_store_error_transport_helper() {
        let err = StoreError::transport("connection reset");
        assert_eq!(
            err,
            StoreError::Transport {
                reason: "connection reset".to_string()
            }
        );
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::invalid("namespace", "", "must not be empty");
        let msg = format!("{}", err);
        assert!(msg.contains("namespace"));
        assert!(msg.contains("must not be empty"));
    }

    #[test]
    fn test_reconciliation_error_display() {
        let err = ReconciliationError::LengthMismatch {
            expected: 2,
            got: 1,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("expected 2"));
        assert!(msg.contains("got 1"));
    }

    #[test]
    fn test_cachet_error_from_conversions() {
        let err: CachetError = StoreError::transport("down").into();
        assert!(matches!(err, CachetError::Store(_)));

        let err: CachetError = ReconciliationError::MissingEntry {
            key: "ns:1".to_string(),
        }
        .into();
        assert!(format!("{}", err).contains("ns:1"));
    }
}
