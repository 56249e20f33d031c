//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest payload the volatile cache accepts, in bytes.
pub const MAX_CACHE_PAYLOAD_BYTES: usize = 1_000_000;

/// Longest TTL or timeout honoured anywhere (100 years). Longer durations
/// are clamped by backends and rejected by [`CachetConfig::validate`].
pub const MAX_EXPIRY_HORIZON: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// When the write path populates the cache relative to the durable write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteOrdering {
    /// Cache write-through before the durable put. A failed put can leave a
    /// cache entry for data that was never committed.
    #[default]
    CacheFirst,
    /// Cache write-through only after the durable put succeeds.
    StoreFirst,
}

impl std::str::FromStr for WriteOrdering {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cache_first" | "cache-first" => Ok(WriteOrdering::CacheFirst),
            "store_first" | "store-first" => Ok(WriteOrdering::StoreFirst),
            other => Err(ConfigError::InvalidValue {
                field: "write_ordering".to_string(),
                value: other.to_string(),
                reason: "expected cache_first or store_first".to_string(),
            }),
        }
    }
}

/// Entity store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachetConfig {
    /// TTL for cache writes made by the store. `None` defers to the cache
    /// backend's default retention, which is not the same as "never expire".
    pub default_ttl: Option<Duration>,
    /// Payload ceiling enforced before any cache write.
    pub max_payload_bytes: usize,
    /// Deadline applied to operations whose context has none.
    pub operation_timeout: Option<Duration>,
    pub write_ordering: WriteOrdering,
}

impl Default for CachetConfig {
    fn default() -> Self {
        Self {
            default_ttl: None,
            max_payload_bytes: MAX_CACHE_PAYLOAD_BYTES,
            operation_timeout: None,
            write_ordering: WriteOrdering::CacheFirst,
        }
    }
}

impl CachetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn with_write_ordering(mut self, ordering: WriteOrdering) -> Self {
        self.write_ordering = ordering;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - max_payload_bytes in 1..=1_000_000
    /// - default_ttl and operation_timeout, when set, are positive
    pub fn validate(&self) -> CachetResult<()> {
        if self.max_payload_bytes == 0 || self.max_payload_bytes > MAX_CACHE_PAYLOAD_BYTES {
            return Err(CachetError::Config(ConfigError::InvalidValue {
                field: "max_payload_bytes".to_string(),
                value: self.max_payload_bytes.to_string(),
                reason: format!(
                    "max_payload_bytes must be between 1 and {}",
                    MAX_CACHE_PAYLOAD_BYTES
                ),
            }));
        }

        if let Some(ttl) = self.default_ttl {
            if ttl.is_zero() {
                return Err(CachetError::Config(ConfigError::InvalidValue {
                    field: "default_ttl".to_string(),
                    value: format!("{:?}", ttl),
                    reason: "default_ttl must be positive; leave unset for backend retention"
                        .to_string(),
                }));
            }
            check_horizon("default_ttl", ttl)?;
        }

        if let Some(timeout) = self.operation_timeout {
            if timeout.is_zero() {
                return Err(CachetError::Config(ConfigError::InvalidValue {
                    field: "operation_timeout".to_string(),
                    value: format!("{:?}", timeout),
                    reason: "operation_timeout must be positive".to_string(),
                }));
            }
            check_horizon("operation_timeout", timeout)?;
        }

        Ok(())
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `CACHET_DEFAULT_TTL_SECS`: TTL for store-issued cache writes (default: backend retention)
    /// - `CACHET_MAX_PAYLOAD_BYTES`: Cache payload ceiling (default: 1000000)
    /// - `CACHET_OPERATION_TIMEOUT_MS`: Deadline for contexts without one (default: none)
    /// - `CACHET_WRITE_ORDERING`: `cache_first` or `store_first` (default: cache_first)
    ///
    /// The result is validated; unparsable values fall back to the default.
    pub fn from_env() -> CachetResult<Self> {
        let defaults = Self::default();

        let config = Self {
            default_ttl: env_parse::<u64>("CACHET_DEFAULT_TTL_SECS")
                .map(Duration::from_secs)
                .or(defaults.default_ttl),
            max_payload_bytes: env_parse("CACHET_MAX_PAYLOAD_BYTES")
                .unwrap_or(defaults.max_payload_bytes),
            operation_timeout: env_parse::<u64>("CACHET_OPERATION_TIMEOUT_MS")
                .map(Duration::from_millis)
                .or(defaults.operation_timeout),
            write_ordering: env_parse("CACHET_WRITE_ORDERING").unwrap_or(defaults.write_ordering),
        };

        config.validate()?;
        Ok(config)
    }
}

fn check_horizon(field: &str, value: Duration) -> CachetResult<()> {
    if value > MAX_EXPIRY_HORIZON {
        return Err(CachetError::Config(ConfigError::InvalidValue {
            field: field.to_string(),
            value: format!("{:?}", value),
            reason: format!("{} must not exceed {:?}", field, MAX_EXPIRY_HORIZON),
        }));
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CachetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_payload_bytes, 1_000_000);
        assert_eq!(config.default_ttl, None);
        assert_eq!(config.write_ordering, WriteOrdering::CacheFirst);
    }

    #[test]
    fn test_builder() {
        let config = CachetConfig::new()
            .with_default_ttl(Duration::from_secs(30))
            .with_max_payload_bytes(4096)
            .with_operation_timeout(Duration::from_millis(250))
            .with_write_ordering(WriteOrdering::StoreFirst);

        assert_eq!(config.default_ttl, Some(Duration::from_secs(30)));
        assert_eq!(config.max_payload_bytes, 4096);
        assert_eq!(config.operation_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.write_ordering, WriteOrdering::StoreFirst);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_payload_ceiling_cannot_be_raised() {
        let config = CachetConfig::new().with_max_payload_bytes(MAX_CACHE_PAYLOAD_BYTES + 1);
        let err = config.validate().unwrap_err();
        match err {
            CachetError::Config(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "max_payload_bytes")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_zero_durations_rejected() {
        assert!(CachetConfig::new()
            .with_default_ttl(Duration::ZERO)
            .validate()
            .is_err());
        assert!(CachetConfig::new()
            .with_operation_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(CachetConfig::new().with_max_payload_bytes(0).validate().is_err());
    }

    #[test]
    fn test_unrepresentable_durations_rejected() {
        let err = CachetConfig::new()
            .with_default_ttl(Duration::MAX)
            .validate()
            .unwrap_err();
        match err {
            CachetError::Config(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "default_ttl")
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(CachetConfig::new()
            .with_operation_timeout(Duration::from_secs(u64::MAX))
            .validate()
            .is_err());
        assert!(CachetConfig::new()
            .with_default_ttl(MAX_EXPIRY_HORIZON)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_write_ordering_from_str() {
        assert_eq!("store_first".parse::<WriteOrdering>().unwrap(), WriteOrdering::StoreFirst);
        assert_eq!("Cache-First".parse::<WriteOrdering>().unwrap(), WriteOrdering::CacheFirst);
        assert!("sideways".parse::<WriteOrdering>().is_err());
    }
}
