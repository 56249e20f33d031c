//! In-process volatile cache with TTLs and a capacity bound.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use cachet_core::{CacheError, CachetError, CachetResult, RequestContext, MAX_EXPIRY_HORIZON};
use tokio::time::Instant;

use crate::traits::{CacheStats, VolatileCache};

/// Configuration for [`MemoryCache`].
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Retention applied when a write carries no TTL.
    pub default_retention: Duration,
    /// Entries held before the soonest-expiring one is evicted.
    pub max_entries: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            default_retention: Duration::from_secs(3600), // 1 hour
            max_entries: 10_000,
        }
    }
}

impl MemoryCacheConfig {
    pub fn with_default_retention(mut self, retention: Duration) -> Self {
        self.default_retention = retention;
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max.max(1);
        self
    }
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Volatile cache held in process memory.
///
/// Expired entries are dropped lazily on access and when room is needed.
#[derive(Debug)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    stats: RwLock<CacheStats>,
    config: MemoryCacheConfig,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_config(MemoryCacheConfig::default())
    }

    pub fn with_config(config: MemoryCacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
            config,
        }
    }

    pub fn config(&self) -> &MemoryCacheConfig {
        &self.config
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|e| e.values().filter(|entry| entry.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time left before `key` expires, or `None` if it is absent or expired.
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.read().ok()?;
        let entry = entries.get(key)?;
        (entry.expires_at > now).then(|| entry.expires_at - now)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        match self.entries.write() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, entry| entry.expires_at > now);
                before - entries.len()
            }
            Err(_) => 0,
        }
    }

    fn record_hit(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.misses += 1;
        }
    }

    fn record_eviction(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.evictions += 1;
        }
    }
}

fn poisoned(operation: &str) -> CachetError {
    CacheError::Backend {
        operation: operation.to_string(),
        reason: "cache lock poisoned".to_string(),
    }
    .into()
}

#[async_trait]
impl VolatileCache for MemoryCache {
    async fn set(
        &self,
        _ctx: &RequestContext,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CachetResult<()> {
        let now = Instant::now();
        let retention = ttl
            .unwrap_or(self.config.default_retention)
            .min(MAX_EXPIRY_HORIZON);
        let expires_at = now.checked_add(retention).ok_or_else(|| {
            CachetError::from(CacheError::Backend {
                operation: "set".to_string(),
                reason: format!("ttl {:?} is out of range", retention),
            })
        })?;
        let mut entries = self.entries.write().map_err(|_| poisoned("set"))?;

        if !entries.contains_key(key) && entries.len() >= self.config.max_entries {
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.config.max_entries {
                let victim = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    entries.remove(&victim);
                    self.record_eviction();
                }
            }
        }

        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, _ctx: &RequestContext, key: &str) -> CachetResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let found = {
            let entries = self.entries.read().map_err(|_| poisoned("get"))?;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
                Some(_) => None,
                None => {
                    self.record_miss();
                    return Ok(None);
                }
            }
        };

        match found {
            Some(value) => {
                self.record_hit();
                Ok(Some(value))
            }
            None => {
                // Expired: drop it.
                if let Ok(mut entries) = self.entries.write() {
                    if entries.get(key).is_some_and(|e| e.expires_at <= now) {
                        entries.remove(key);
                    }
                }
                self.record_miss();
                Ok(None)
            }
        }
    }

    async fn delete(&self, _ctx: &RequestContext, key: &str) -> CachetResult<bool> {
        let mut entries = self.entries.write().map_err(|_| poisoned("delete"))?;
        Ok(entries.remove(key).is_some())
    }

    async fn stats(&self) -> CachetResult<CacheStats> {
        let mut stats = self.stats.read().map(|s| s.clone()).unwrap_or_default();
        let now = Instant::now();
        if let Ok(entries) = self.entries.read() {
            let live = entries.values().filter(|e| e.expires_at > now);
            let (count, bytes) = live.fold((0u64, 0u64), |(c, b), e| (c + 1, b + e.value.len() as u64));
            stats.entry_count = count;
            stats.memory_bytes = bytes;
        }
        Ok(stats)
    }
}
