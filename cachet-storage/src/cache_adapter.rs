//! Size-bounded, TTL-aware facade over a [`VolatileCache`].

use std::sync::Arc;
use std::time::Duration;

use cachet_core::{
    decode_record, encode_record, CacheError, CachetError, CachetResult, RequestContext,
    Retrievable, MAX_CACHE_PAYLOAD_BYTES,
};

use crate::traits::VolatileCache;

/// Translates entity store intent into cache calls.
///
/// The payload ceiling is checked before any backend call, and every call
/// runs under the caller's context.
pub struct CacheAdapter<C: VolatileCache> {
    backend: Arc<C>,
    max_payload_bytes: usize,
}

impl<C: VolatileCache> CacheAdapter<C> {
    pub fn new(backend: Arc<C>) -> Self {
        Self {
            backend,
            max_payload_bytes: MAX_CACHE_PAYLOAD_BYTES,
        }
    }

    /// Lower the payload ceiling. Values above the cache limit are clamped.
    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max.min(MAX_CACHE_PAYLOAD_BYTES);
        self
    }

    pub fn backend(&self) -> &C {
        &self.backend
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Encode `value` and write it under `key`.
    pub async fn set<R: Retrievable>(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: &R,
        ttl: Option<Duration>,
    ) -> CachetResult<()> {
        let bytes = encode_record(value)?;
        self.set_bytes(ctx, key, bytes, ttl).await
    }

    /// Write an already encoded payload under `key`.
    ///
    /// A zero `ttl` is the same as none: the backend's default retention.
    pub async fn set_bytes(
        &self,
        ctx: &RequestContext,
        key: &str,
        bytes: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CachetResult<()> {
        if bytes.len() > self.max_payload_bytes {
            return Err(CacheError::PayloadTooLarge {
                key: key.to_string(),
                size: bytes.len(),
                limit: self.max_payload_bytes,
            }
            .into());
        }
        let ttl = ttl.filter(|t| !t.is_zero());
        ctx.run(self.backend.set(ctx, key, bytes, ttl)).await
    }

    /// Read `key` into `out`.
    ///
    /// Misses and backend failures both come back as `CacheError::Miss`;
    /// cancellation is passed through. Bytes that do not decode are reported
    /// as a decode failure.
    pub async fn get<R: Retrievable>(
        &self,
        ctx: &RequestContext,
        key: &str,
        out: &mut R,
    ) -> CachetResult<()> {
        let bytes = match ctx.run(self.backend.get(ctx, key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(miss(key)),
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                tracing::debug!(cache_key = key, error = %e, "cache read failed, treating as miss");
                return Err(miss(key));
            }
        };
        decode_record(&bytes, out)
    }

    /// Remove `key`. Present and absent entries are both success.
    pub async fn delete(&self, ctx: &RequestContext, key: &str) -> CachetResult<()> {
        ctx.run(self.backend.delete(ctx, key)).await.map(|_| ())
    }

    /// Rewrite the entry under `key` with a new `ttl`.
    ///
    /// Fails with `CacheError::Miss` if the entry is gone.
    pub async fn refresh_ttl(
        &self,
        ctx: &RequestContext,
        key: &str,
        ttl: Option<Duration>,
    ) -> CachetResult<()> {
        let bytes = ctx
            .run(self.backend.get(ctx, key))
            .await?
            .ok_or_else(|| miss(key))?;
        let ttl = ttl.filter(|t| !t.is_zero());
        ctx.run(self.backend.set(ctx, key, bytes, ttl)).await
    }
}

impl<C: VolatileCache> Clone for CacheAdapter<C> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            max_payload_bytes: self.max_payload_bytes,
        }
    }
}

fn miss(key: &str) -> CachetError {
    CacheError::Miss {
        key: key.to_string(),
    }
    .into()
}
