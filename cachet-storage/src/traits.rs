//! Backend traits for the volatile cache and the durable store.
//!
//! These are the only interfaces the entity store needs from its two
//! collaborators. Every call receives the caller's [`RequestContext`]; the
//! adapters additionally race each call against the context's cancellation
//! and deadline, so implementations do not have to.

use std::time::Duration;

use async_trait::async_trait;
use cachet_core::{CachetResult, RequestContext, StorageKey};

/// Property document persisted by a durable store.
pub type Document = serde_json::Value;

/// Volatile byte cache addressed by string keys.
///
/// Entries may disappear at any time. A `None` from [`VolatileCache::get`]
/// means "not cached", never "does not exist".
#[async_trait]
pub trait VolatileCache: Send + Sync {
    /// Store `value` under `key`.
    ///
    /// `ttl` of `None` means the backend's default retention, which may
    /// still evict the entry early.
    async fn set(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CachetResult<()>;

    /// Read the bytes under `key`, or `None` on a miss.
    async fn get(&self, ctx: &RequestContext, key: &str) -> CachetResult<Option<Vec<u8>>>;

    /// Remove `key`. Returns whether an entry was present.
    async fn delete(&self, ctx: &RequestContext, key: &str) -> CachetResult<bool>;

    /// Get cache statistics.
    async fn stats(&self) -> CachetResult<CacheStats>;
}

/// Durable key/value store of property documents.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Write `document` under `key` and return the resolved key.
    ///
    /// An incomplete key asks the store to allocate an id; the returned key
    /// carries it.
    async fn put(
        &self,
        ctx: &RequestContext,
        key: &StorageKey,
        document: Document,
    ) -> CachetResult<StorageKey>;

    /// Read the document under `key`.
    ///
    /// Absence must be reported as `StoreError::NotFound`, distinct from any
    /// other failure.
    async fn get(&self, ctx: &RequestContext, key: &StorageKey) -> CachetResult<Document>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, ctx: &RequestContext, key: &StorageKey) -> CachetResult<()>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate payload bytes held.
    pub memory_bytes: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
