//! Facade over a [`DurableStore`].
//!
//! Records go in and come out as serde property documents. The `*_at`
//! variants take an already derived key so callers that need the key for
//! other purposes derive it once.

use std::sync::Arc;

use cachet_core::{
    assign_key, CachetError, CachetResult, KeyMaterial, RequestContext, Retrievable, StorageKey,
};

use crate::traits::DurableStore;

/// Translates entity store intent into durable store calls.
pub struct StoreAdapter<S: DurableStore> {
    backend: Arc<S>,
}

impl<S: DurableStore> StoreAdapter<S> {
    pub fn new(backend: Arc<S>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Derive the key for `material` and write `record` under it.
    pub async fn put<R: Retrievable>(
        &self,
        ctx: &RequestContext,
        material: &KeyMaterial,
        record: &mut R,
    ) -> CachetResult<StorageKey> {
        let key = record.derive_key(ctx, material)?;
        self.put_at(ctx, &key, record).await
    }

    /// Write `record` under `key` and return the resolved key.
    ///
    /// On success the resolved key is assigned back to records that track
    /// their own key. Backend failures are returned unchanged.
    pub async fn put_at<R: Retrievable>(
        &self,
        ctx: &RequestContext,
        key: &StorageKey,
        record: &mut R,
    ) -> CachetResult<StorageKey> {
        key.validate_for_write()?;
        let document = serde_json::to_value(&*record).map_err(CachetError::encode)?;
        let resolved = ctx.run(self.backend.put(ctx, key, document)).await?;
        assign_key(record, &resolved);
        Ok(resolved)
    }

    /// Derive the key for `material` and read into `out`.
    pub async fn get<R: Retrievable>(
        &self,
        ctx: &RequestContext,
        material: &KeyMaterial,
        out: &mut R,
    ) -> CachetResult<()> {
        let key = out.derive_key(ctx, material)?;
        self.get_at(ctx, &key, out).await
    }

    /// Read the record under `key` into `out`.
    ///
    /// Incomplete keys are rejected before any backend call. `NotFound` is
    /// passed through as is.
    pub async fn get_at<R: Retrievable>(
        &self,
        ctx: &RequestContext,
        key: &StorageKey,
        out: &mut R,
    ) -> CachetResult<()> {
        key.validate_for_lookup()?;
        let document = ctx.run(self.backend.get(ctx, key)).await?;
        *out = serde_json::from_value(document).map_err(CachetError::decode)?;
        assign_key(out, key);
        Ok(())
    }

    /// Derive the key for `material` and delete it.
    pub async fn delete<R: Retrievable>(
        &self,
        ctx: &RequestContext,
        material: &KeyMaterial,
        record: &R,
    ) -> CachetResult<()> {
        let key = record.derive_key(ctx, material)?;
        self.delete_at(ctx, &key).await
    }

    /// Delete `key`. Deleting an absent key succeeds.
    pub async fn delete_at(&self, ctx: &RequestContext, key: &StorageKey) -> CachetResult<()> {
        key.validate_for_lookup()?;
        ctx.run(self.backend.delete(ctx, key)).await
    }
}

impl<S: DurableStore> Clone for StoreAdapter<S> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryStore;
    use crate::traits::Document;
    use async_trait::async_trait;
    use cachet_core::{IntId, SelfKeyAssignment, StoreError};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: u64,
        #[serde(skip)]
        id: IntId,
    }

    impl Retrievable for Counter {
        fn derive_key(&self, ctx: &RequestContext, material: &KeyMaterial) -> CachetResult<StorageKey> {
            Ok(ctx.numeric_key("Counter", material.expect_int()?))
        }

        fn key_slot(&mut self) -> Option<&mut dyn SelfKeyAssignment> {
            Some(&mut self.id)
        }
    }

    /// Fails every call and counts them.
    #[derive(Default)]
    struct Unavailable {
        calls: AtomicUsize,
    }

    impl Unavailable {
        fn fail(&self, operation: &str) -> CachetError {
            self.calls.fetch_add(1, Ordering::SeqCst);
            StoreError::Backend {
                operation: operation.to_string(),
                reason: "quota exceeded".to_string(),
            }
            .into()
        }
    }

    #[async_trait]
    impl DurableStore for Unavailable {
        async fn put(&self, _ctx: &RequestContext, _key: &StorageKey, _document: Document) -> CachetResult<StorageKey> {
            Err(self.fail("put"))
        }

        async fn get(&self, _ctx: &RequestContext, _key: &StorageKey) -> CachetResult<Document> {
            Err(self.fail("get"))
        }

        async fn delete(&self, _ctx: &RequestContext, _key: &StorageKey) -> CachetResult<()> {
            Err(self.fail("delete"))
        }
    }

    #[tokio::test]
    async fn test_put_assigns_allocated_id() {
        let adapter = StoreAdapter::new(Arc::new(MemoryStore::new()));
        let ctx = RequestContext::new();
        let mut counter = Counter {
            count: 3,
            ..Default::default()
        };

        let key = adapter
            .put(&ctx, &KeyMaterial::Int(0), &mut counter)
            .await
            .unwrap();
        assert!(!key.is_incomplete());
        assert_eq!(counter.id, IntId(key.int_id()));
    }

    #[tokio::test]
    async fn test_get_reads_and_assigns_key() {
        let adapter = StoreAdapter::new(Arc::new(MemoryStore::new()));
        let ctx = RequestContext::new();
        let mut counter = Counter {
            count: 9,
            ..Default::default()
        };
        adapter.put(&ctx, &KeyMaterial::Int(5), &mut counter).await.unwrap();

        let mut out = Counter::default();
        adapter.get(&ctx, &KeyMaterial::Int(5), &mut out).await.unwrap();
        assert_eq!(out.count, 9);
        assert_eq!(out.id, IntId(5));
    }

    #[tokio::test]
    async fn test_get_not_found_is_distinct() {
        let adapter = StoreAdapter::new(Arc::new(MemoryStore::new()));
        let mut out = Counter::default();
        let err = adapter
            .get(&RequestContext::new(), &KeyMaterial::Int(404), &mut out)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_zero_key_rejected_before_backend() {
        let backend = Arc::new(Unavailable::default());
        let adapter = StoreAdapter::new(Arc::clone(&backend));
        let mut out = Counter::default();

        let err = adapter
            .get(&RequestContext::new(), &KeyMaterial::Int(0), &mut out)
            .await
            .unwrap_err();
        assert!(err.is_invalid_key_material());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_material_shape_fails() {
        let adapter = StoreAdapter::new(Arc::new(MemoryStore::new()));
        let mut out = Counter::default();
        let err = adapter
            .get(&RequestContext::new(), &KeyMaterial::from("five"), &mut out)
            .await
            .unwrap_err();
        assert!(err.is_invalid_key_material());
    }

    #[tokio::test]
    async fn test_backend_failures_pass_through_unchanged() {
        let adapter = StoreAdapter::new(Arc::new(Unavailable::default()));
        let ctx = RequestContext::new();
        let mut counter = Counter::default();

        let err = adapter
            .put(&ctx, &KeyMaterial::Int(1), &mut counter)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CachetError::Store(StoreError::Backend {
                operation: "put".into(),
                reason: "quota exceeded".into(),
            })
        );
        // Failed writes do not assign a key.
        assert_eq!(counter.id, IntId(0));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let adapter = StoreAdapter::new(Arc::new(MemoryStore::new()));
        let ctx = RequestContext::new();
        let record = Counter::default();
        adapter.delete(&ctx, &KeyMaterial::Int(77), &record).await.unwrap();
        adapter.delete(&ctx, &KeyMaterial::Int(77), &record).await.unwrap();
    }
}
