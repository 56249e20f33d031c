//! Cache-aside orchestration over a volatile cache and a durable store.
//!
//! Three linear protocols, no state between calls:
//!
//! - **get**: cache first; on any cache failure read the store, then
//!   repopulate the cache best-effort.
//! - **place**: cache write-through, then the durable put, whose result is
//!   the result of the call (see [`WriteOrdering`] for the opt-in reverse).
//! - **delete**: best-effort cache delete, then the durable delete.
//!
//! Failures fall in two lanes. Cache-side failures are logged and swallowed
//! (or turned into a fallback read); durable store results are always
//! returned to the caller unchanged.

use std::sync::Arc;
use std::time::Duration;

use cachet_core::{
    assign_key, CachetConfig, CachetResult, KeyMaterial, RequestContext, Retrievable, StorageKey,
    WriteOrdering,
};
use tracing::{debug, warn};

use crate::cache_adapter::CacheAdapter;
use crate::store_adapter::StoreAdapter;
use crate::traits::{DurableStore, VolatileCache};

/// Cache-aside entity store.
///
/// # Type Parameters
///
/// - `C`: The volatile cache backend
/// - `S`: The durable store backend
///
/// # Example
///
/// ```ignore
/// let entities = EntityStore::with_defaults(Arc::new(MemoryCache::new()), Arc::new(MemoryStore::new()));
///
/// let mut profile = Profile { display_name: "Alice".into(), ..Default::default() };
/// let key = entities.place_entity(&ctx, "alice", &mut profile).await?;
///
/// let mut loaded = Profile::default();
/// entities.get_entity(&ctx, "alice", &mut loaded).await?;
///
/// entities.delete_entity(&ctx, &key).await?;
/// ```
pub struct EntityStore<C, S>
where
    C: VolatileCache,
    S: DurableStore,
{
    cache: CacheAdapter<C>,
    store: StoreAdapter<S>,
    config: CachetConfig,
}

impl<C, S> EntityStore<C, S>
where
    C: VolatileCache,
    S: DurableStore,
{
    /// Create an entity store; fails if `config` is invalid.
    pub fn new(cache: Arc<C>, store: Arc<S>, config: CachetConfig) -> CachetResult<Self> {
        config.validate()?;
        Ok(Self {
            cache: CacheAdapter::new(cache).with_max_payload_bytes(config.max_payload_bytes),
            store: StoreAdapter::new(store),
            config,
        })
    }

    /// Create an entity store with default configuration.
    pub fn with_defaults(cache: Arc<C>, store: Arc<S>) -> Self {
        Self {
            cache: CacheAdapter::new(cache),
            store: StoreAdapter::new(store),
            config: CachetConfig::default(),
        }
    }

    pub fn config(&self) -> &CachetConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheAdapter<C> {
        &self.cache
    }

    pub fn store(&self) -> &StoreAdapter<S> {
        &self.store
    }

    fn scoped(&self, ctx: &RequestContext) -> RequestContext {
        ctx.clone().with_default_timeout(self.config.operation_timeout)
    }

    /// Read the record for `material` into `out`.
    ///
    /// A cache hit never touches the store. Any cache failure, decode
    /// failures included, falls through to the store; store failures,
    /// `NotFound` included, are returned unchanged.
    #[tracing::instrument(level = "debug", skip_all, fields(cache_key = tracing::field::Empty))]
    pub async fn get_entity<R: Retrievable>(
        &self,
        ctx: &RequestContext,
        material: impl Into<KeyMaterial>,
        out: &mut R,
    ) -> CachetResult<()> {
        let ctx = self.scoped(ctx);
        let key = out.derive_key(&ctx, &material.into())?;
        key.validate_for_lookup()?;
        let cache_key = key.encode();
        tracing::Span::current().record("cache_key", cache_key.as_str());

        match self.cache.get(&ctx, &cache_key, out).await {
            Ok(()) => {
                debug!(key = %key, "cache hit");
                assign_key(out, &key);
                return Ok(());
            }
            Err(e) => best_effort("read", &cache_key, Err(e)),
        }

        self.store.get_at(&ctx, &key, out).await?;

        best_effort(
            "repopulate",
            &cache_key,
            self.cache
                .set(&ctx, &cache_key, &*out, self.config.default_ttl)
                .await,
        );
        Ok(())
    }

    /// Write `input` under the key derived from `material`.
    ///
    /// Returns the resolved storage key. With the default
    /// [`WriteOrdering::CacheFirst`] the cache is written before the durable
    /// put, so a failed put can leave a cache entry describing uncommitted
    /// data. Incomplete keys skip the early cache write: nothing is ever
    /// cached under the zero id.
    #[tracing::instrument(level = "debug", skip_all, fields(cache_key = tracing::field::Empty))]
    pub async fn place_entity<R: Retrievable>(
        &self,
        ctx: &RequestContext,
        material: impl Into<KeyMaterial>,
        input: &mut R,
    ) -> CachetResult<StorageKey> {
        let ctx = self.scoped(ctx);
        let key = input.derive_key(&ctx, &material.into())?;
        key.validate_for_write()?;
        let ttl = self.config.default_ttl;

        match self.config.write_ordering {
            WriteOrdering::CacheFirst => {
                if key.is_incomplete() {
                    debug!(key = %key, "incomplete key, skipping cache write-through");
                } else {
                    let cache_key = key.encode();
                    tracing::Span::current().record("cache_key", cache_key.as_str());
                    best_effort(
                        "write-through",
                        &cache_key,
                        self.cache.set(&ctx, &cache_key, &*input, ttl).await,
                    );
                }
                self.store.put_at(&ctx, &key, input).await
            }
            WriteOrdering::StoreFirst => {
                let resolved = self.store.put_at(&ctx, &key, input).await?;
                let cache_key = resolved.encode();
                tracing::Span::current().record("cache_key", cache_key.as_str());
                best_effort(
                    "write-through",
                    &cache_key,
                    self.cache.set(&ctx, &cache_key, &*input, ttl).await,
                );
                Ok(resolved)
            }
        }
    }

    /// Delete the record under `key` from both backends.
    ///
    /// Only the durable delete's result is returned; deleting an absent
    /// record succeeds.
    #[tracing::instrument(level = "debug", skip_all, fields(key = %key))]
    pub async fn delete_entity(&self, ctx: &RequestContext, key: &StorageKey) -> CachetResult<()> {
        let ctx = self.scoped(ctx);
        key.validate_for_lookup()?;
        let cache_key = key.encode();

        best_effort("delete", &cache_key, self.cache.delete(&ctx, &cache_key).await);
        self.store.delete_at(&ctx, key).await
    }

    /// Give the cached copy of `key` a new TTL.
    ///
    /// Fails with a cache miss if nothing is cached. The store is not touched.
    pub async fn refresh_ttl(
        &self,
        ctx: &RequestContext,
        key: &StorageKey,
        ttl: Duration,
    ) -> CachetResult<()> {
        let ctx = self.scoped(ctx);
        key.validate_for_lookup()?;
        self.cache.refresh_ttl(&ctx, &key.encode(), Some(ttl)).await
    }

    /// Drop the cached copy of `key`, leaving the durable record alone.
    pub async fn evict(&self, ctx: &RequestContext, key: &StorageKey) -> CachetResult<()> {
        let ctx = self.scoped(ctx);
        key.validate_for_lookup()?;
        self.cache.delete(&ctx, &key.encode()).await
    }
}

impl<C, S> Clone for EntityStore<C, S>
where
    C: VolatileCache,
    S: DurableStore,
{
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

/// The swallow lane for cache-side results.
fn best_effort(operation: &'static str, cache_key: &str, result: CachetResult<()>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_cache_miss() => {
            debug!(operation, cache_key, "cache miss");
        }
        Err(e) => {
            warn!(operation, cache_key, error = %e, "best-effort cache operation failed");
        }
    }
}
