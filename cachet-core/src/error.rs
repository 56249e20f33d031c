//! Error types for cachet operations

use std::time::Duration;
use thiserror::Error;

/// Key derivation and key encoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid key material: {reason}")]
    InvalidKeyMaterial { reason: String },

    #[error("Malformed cache key {encoded:?}: {reason}")]
    Malformed { encoded: String, reason: String },
}

/// Volatile cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache miss for {key}")]
    Miss { key: String },

    #[error("Payload for {key} is {size} bytes, cache limit is {limit} bytes")]
    PayloadTooLarge {
        key: String,
        size: usize,
        limit: usize,
    },

    #[error("Cache backend failure during {operation}: {reason}")]
    Backend { operation: String, reason: String },
}

/// Durable store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Entity not found: {key}")]
    NotFound { key: String },

    #[error("Store backend failure during {operation}: {reason}")]
    Backend { operation: String, reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Record encoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encoding failed: {reason}")]
    Encode { reason: String },

    #[error("Decoding failed: {reason}")]
    Decode { reason: String },
}

/// Request context errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Operation cancelled by caller")]
    Cancelled,

    #[error("Deadline exceeded after {elapsed:?}")]
    DeadlineExceeded { elapsed: Duration },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all cachet errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CachetError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CachetError {
    /// Shorthand for an [`KeyError::InvalidKeyMaterial`] error.
    pub fn invalid_key_material(reason: impl Into<String>) -> Self {
        KeyError::InvalidKeyMaterial {
            reason: reason.into(),
        }
        .into()
    }

    /// Shorthand for a [`CodecError::Decode`] error.
    pub fn decode(reason: impl ToString) -> Self {
        CodecError::Decode {
            reason: reason.to_string(),
        }
        .into()
    }

    /// Shorthand for a [`CodecError::Encode`] error.
    pub fn encode(reason: impl ToString) -> Self {
        CodecError::Encode {
            reason: reason.to_string(),
        }
        .into()
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CachetError::Store(StoreError::NotFound { .. }))
    }

    pub fn is_cache_miss(&self) -> bool {
        matches!(self, CachetError::Cache(CacheError::Miss { .. }))
    }

    pub fn is_invalid_key_material(&self) -> bool {
        matches!(self, CachetError::Key(KeyError::InvalidKeyMaterial { .. }))
    }

    pub fn is_payload_too_large(&self) -> bool {
        matches!(self, CachetError::Cache(CacheError::PayloadTooLarge { .. }))
    }

    pub fn is_decode_failure(&self) -> bool {
        matches!(self, CachetError::Codec(CodecError::Decode { .. }))
    }

    /// True for cancellation and deadline errors raised by the request context.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CachetError::Context(_))
    }
}

/// Result type alias for cachet operations.
pub type CachetResult<T> = Result<T, CachetError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_not_found() {
        let err = StoreError::NotFound {
            key: "/Profile,alice".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("/Profile,alice"));
    }

    #[test]
    fn test_payload_too_large_display() {
        let err = CacheError::PayloadTooLarge {
            key: "k".to_string(),
            size: 1_000_001,
            limit: 1_000_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("1000001"));
        assert!(msg.contains("1000000"));
    }

    #[test]
    fn test_master_error_wraps_layers() {
        let err: CachetError = StoreError::NotFound {
            key: "k".to_string(),
        }
        .into();
        assert!(err.is_not_found());
        assert!(!err.is_cache_miss());

        let err: CachetError = CacheError::Miss {
            key: "k".to_string(),
        }
        .into();
        assert!(err.is_cache_miss());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_classification_helpers() {
        assert!(CachetError::invalid_key_material("zero id").is_invalid_key_material());
        assert!(CachetError::decode("eof").is_decode_failure());
        assert!(CachetError::from(ContextError::Cancelled).is_cancellation());
        assert!(CachetError::from(ContextError::DeadlineExceeded {
            elapsed: Duration::from_millis(5)
        })
        .is_cancellation());
        assert!(CachetError::from(CacheError::PayloadTooLarge {
            key: "k".into(),
            size: 2,
            limit: 1
        })
        .is_payload_too_large());
    }
}
