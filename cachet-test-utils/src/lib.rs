//! cachet Test Utilities
//!
//! Shared test infrastructure for the cachet workspace:
//! - Recording backends that log every call and can inject failures
//! - Fixture records covering each capability combination
//! - Proptest generators for keys and key material
//! - Custom assertions for cachet error variants

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

// Re-export core types for convenience
pub use cachet_core::{
    CacheError, CachetConfig, CachetError, CachetResult, ContextError, CustomSerialization,
    IntId, KeyError, KeyId, KeyMaterial, RequestContext, Retrievable, SelfKeyAssignment,
    StorageKey, StoreError, StringId, WriteOrdering, MAX_CACHE_PAYLOAD_BYTES,
};
pub use cachet_storage::{
    CacheStats, Document, DurableStore, EntityStore, MemoryCache, MemoryStore, VolatileCache,
};

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honours `RUST_LOG`. Safe to call from every test; only the first call
/// installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// CALL LOG
// ============================================================================

/// One backend call, as seen by a recording backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CacheSet { key: String, ttl: Option<Duration> },
    CacheGet { key: String },
    CacheDelete { key: String },
    StorePut { key: StorageKey },
    StoreGet { key: StorageKey },
    StoreDelete { key: StorageKey },
}

impl Call {
    pub fn is_cache(&self) -> bool {
        matches!(
            self,
            Call::CacheSet { .. } | Call::CacheGet { .. } | Call::CacheDelete { .. }
        )
    }

    pub fn is_store(&self) -> bool {
        !self.is_cache()
    }

    /// Short label such as `"cache.set"`, handy for ordering assertions.
    pub fn label(&self) -> &'static str {
        match self {
            Call::CacheSet { .. } => "cache.set",
            Call::CacheGet { .. } => "cache.get",
            Call::CacheDelete { .. } => "cache.delete",
            Call::StorePut { .. } => "store.put",
            Call::StoreGet { .. } => "store.get",
            Call::StoreDelete { .. } => "store.delete",
        }
    }
}

/// Ordered log of calls, shared between a recording cache and store.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: Call) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    /// Snapshot of every call so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Call labels in order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.calls().iter().map(Call::label).collect()
    }

    pub fn count(&self, label: &str) -> usize {
        self.calls().iter().filter(|c| c.label() == label).count()
    }

    pub fn is_empty(&self) -> bool {
        self.calls().is_empty()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }
}

/// Per-operation failure and stall switches.
#[derive(Debug, Default)]
struct Faults {
    fail_set: AtomicBool,
    fail_get: AtomicBool,
    fail_delete: AtomicBool,
    stall: AtomicBool,
}

impl Faults {
    async fn gate(&self, fail: &AtomicBool) -> bool {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        fail.load(Ordering::SeqCst)
    }
}

fn injected_cache(operation: &str) -> CachetError {
    CacheError::Backend {
        operation: operation.to_string(),
        reason: "injected failure".to_string(),
    }
    .into()
}

fn injected_store(operation: &str) -> CachetError {
    StoreError::Backend {
        operation: operation.to_string(),
        reason: "injected failure".to_string(),
    }
    .into()
}

// ============================================================================
// RECORDING BACKENDS
// ============================================================================

/// [`MemoryCache`] wrapper that logs calls and injects faults.
#[derive(Debug)]
pub struct RecordingCache {
    inner: MemoryCache,
    log: CallLog,
    faults: Faults,
}

impl RecordingCache {
    pub fn new(log: CallLog) -> Self {
        Self {
            inner: MemoryCache::new(),
            log,
            faults: Faults::default(),
        }
    }

    /// The wrapped cache, for inspecting contents without logging a call.
    pub fn inner(&self) -> &MemoryCache {
        &self.inner
    }

    pub fn fail_sets(&self, on: bool) {
        self.faults.fail_set.store(on, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, on: bool) {
        self.faults.fail_get.store(on, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, on: bool) {
        self.faults.fail_delete.store(on, Ordering::SeqCst);
    }

    /// Make every call hang until the caller gives up.
    pub fn stall(&self, on: bool) {
        self.faults.stall.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl VolatileCache for RecordingCache {
    async fn set(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CachetResult<()> {
        self.log.push(Call::CacheSet {
            key: key.to_string(),
            ttl,
        });
        if self.faults.gate(&self.faults.fail_set).await {
            return Err(injected_cache("set"));
        }
        self.inner.set(ctx, key, value, ttl).await
    }

    async fn get(&self, ctx: &RequestContext, key: &str) -> CachetResult<Option<Vec<u8>>> {
        self.log.push(Call::CacheGet {
            key: key.to_string(),
        });
        if self.faults.gate(&self.faults.fail_get).await {
            return Err(injected_cache("get"));
        }
        self.inner.get(ctx, key).await
    }

    async fn delete(&self, ctx: &RequestContext, key: &str) -> CachetResult<bool> {
        self.log.push(Call::CacheDelete {
            key: key.to_string(),
        });
        if self.faults.gate(&self.faults.fail_delete).await {
            return Err(injected_cache("delete"));
        }
        self.inner.delete(ctx, key).await
    }

    async fn stats(&self) -> CachetResult<CacheStats> {
        self.inner.stats().await
    }
}

/// [`MemoryStore`] wrapper that logs calls and injects faults.
#[derive(Debug)]
pub struct RecordingStore {
    inner: MemoryStore,
    log: CallLog,
    faults: Faults,
}

impl RecordingStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            inner: MemoryStore::new(),
            log,
            faults: Faults::default(),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_puts(&self, on: bool) {
        self.faults.fail_set.store(on, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, on: bool) {
        self.faults.fail_get.store(on, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, on: bool) {
        self.faults.fail_delete.store(on, Ordering::SeqCst);
    }

    pub fn stall(&self, on: bool) {
        self.faults.stall.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl DurableStore for RecordingStore {
    async fn put(
        &self,
        ctx: &RequestContext,
        key: &StorageKey,
        document: Document,
    ) -> CachetResult<StorageKey> {
        self.log.push(Call::StorePut { key: key.clone() });
        if self.faults.gate(&self.faults.fail_set).await {
            return Err(injected_store("put"));
        }
        self.inner.put(ctx, key, document).await
    }

    async fn get(&self, ctx: &RequestContext, key: &StorageKey) -> CachetResult<Document> {
        self.log.push(Call::StoreGet { key: key.clone() });
        if self.faults.gate(&self.faults.fail_get).await {
            return Err(injected_store("get"));
        }
        self.inner.get(ctx, key).await
    }

    async fn delete(&self, ctx: &RequestContext, key: &StorageKey) -> CachetResult<()> {
        self.log.push(Call::StoreDelete { key: key.clone() });
        if self.faults.gate(&self.faults.fail_delete).await {
            return Err(injected_store("delete"));
        }
        self.inner.delete(ctx, key).await
    }
}

/// An entity store over recording backends that share one log.
pub struct Harness {
    pub entities: EntityStore<RecordingCache, RecordingStore>,
    pub cache: Arc<RecordingCache>,
    pub store: Arc<RecordingStore>,
    pub log: CallLog,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CachetConfig::default())
    }

    /// # Panics
    ///
    /// Panics if `config` does not validate.
    pub fn with_config(config: CachetConfig) -> Self {
        let log = CallLog::new();
        let cache = Arc::new(RecordingCache::new(log.clone()));
        let store = Arc::new(RecordingStore::new(log.clone()));
        let entities = EntityStore::new(Arc::clone(&cache), Arc::clone(&store), config)
            .expect("test config should validate");
        Self {
            entities,
            cache,
            store,
            log,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Record types exercising each capability combination.

    use super::*;
    use serde::{Deserialize, Serialize};

    /// Named record that tracks its own key.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Profile {
        pub display_name: String,
        pub email: String,
        #[serde(skip)]
        pub id: StringId,
    }

    impl Profile {
        pub fn new(display_name: &str) -> Self {
            Self {
                display_name: display_name.to_string(),
                email: format!("{}@example.com", display_name.to_lowercase()),
                id: StringId::default(),
            }
        }
    }

    impl Retrievable for Profile {
        /// Accepts a name, or a ready-made storage key.
        fn derive_key(&self, ctx: &RequestContext, material: &KeyMaterial) -> CachetResult<StorageKey> {
            match material {
                KeyMaterial::Key(key) => Ok(key.clone()),
                other => Ok(ctx.named_key("Profile", other.expect_name()?)),
            }
        }

        fn key_slot(&mut self) -> Option<&mut dyn SelfKeyAssignment> {
            Some(&mut self.id)
        }
    }

    /// Numeric record, optionally nested under a parent key.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Counter {
        pub count: u64,
        #[serde(skip)]
        pub id: IntId,
    }

    impl Counter {
        pub fn new(count: u64) -> Self {
            Self {
                count,
                id: IntId::default(),
            }
        }
    }

    impl Retrievable for Counter {
        /// Accepts an integer, or `[parent key, integer]`.
        fn derive_key(&self, ctx: &RequestContext, material: &KeyMaterial) -> CachetResult<StorageKey> {
            match material {
                KeyMaterial::Composite(parts) => match parts.as_slice() {
                    [KeyMaterial::Key(parent), id] => {
                        ctx.numeric_key("Counter", id.expect_int()?).with_parent(parent)
                    }
                    _ => Err(CachetError::invalid_key_material(
                        "expected [parent key, integer] composite",
                    )),
                },
                other => Ok(ctx.numeric_key("Counter", other.expect_int()?)),
            }
        }

        fn key_slot(&mut self) -> Option<&mut dyn SelfKeyAssignment> {
            Some(&mut self.id)
        }
    }

    /// Plain record with no optional capabilities.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Setting {
        pub value: String,
    }

    impl Retrievable for Setting {
        fn derive_key(&self, ctx: &RequestContext, material: &KeyMaterial) -> CachetResult<StorageKey> {
            Ok(ctx.named_key("Setting", material.expect_name()?))
        }
    }

    /// Record whose cache encoding is its raw payload bytes.
    ///
    /// The encoded size equals `payload.len()`, which makes it the fixture
    /// for payload ceiling tests.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct OpaqueBlob {
        pub payload: Vec<u8>,
    }

    impl OpaqueBlob {
        /// A blob that encodes to exactly `size` bytes.
        pub fn sized(size: usize) -> Self {
            Self {
                payload: vec![b'x'; size],
            }
        }
    }

    impl CustomSerialization for OpaqueBlob {
        fn encode(&self) -> CachetResult<Vec<u8>> {
            Ok(self.payload.clone())
        }

        fn decode(&mut self, bytes: &[u8]) -> CachetResult<()> {
            self.payload = bytes.to_vec();
            Ok(())
        }
    }

    impl Retrievable for OpaqueBlob {
        fn derive_key(&self, ctx: &RequestContext, material: &KeyMaterial) -> CachetResult<StorageKey> {
            Ok(ctx.named_key("OpaqueBlob", material.expect_name()?))
        }

        fn custom_codec(&self) -> Option<&dyn CustomSerialization> {
            Some(self)
        }

        fn custom_codec_mut(&mut self) -> Option<&mut dyn CustomSerialization> {
            Some(self)
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cachet key types.

    use super::*;
    use proptest::prelude::*;

    /// Complete key ids: non-zero integers or non-empty names.
    pub fn arb_key_id() -> impl Strategy<Value = KeyId> {
        prop_oneof![
            any::<i64>().prop_filter("zero is reserved", |id| *id != 0).prop_map(KeyId::Int),
            "[a-zA-Z0-9_\\-./ ]{1,24}".prop_map(KeyId::Name),
        ]
    }

    pub fn arb_kind() -> impl Strategy<Value = String> {
        "[A-Z][a-zA-Z]{0,11}"
    }

    pub fn arb_namespace() -> impl Strategy<Value = String> {
        prop_oneof![Just(String::new()), "[a-z][a-z0-9-]{0,11}"]
    }

    /// Complete keys with up to two ancestors.
    pub fn arb_storage_key() -> impl Strategy<Value = StorageKey> {
        (
            arb_namespace(),
            prop::collection::vec((arb_kind(), arb_key_id()), 1..=3),
        )
            .prop_map(|(namespace, segments)| {
                let mut key: Option<StorageKey> = None;
                for (kind, id) in segments {
                    let next = StorageKey::new(namespace.clone(), kind, id);
                    key = Some(match key {
                        Some(parent) => next
                            .with_parent(&parent)
                            .expect("generated segments share a namespace"),
                        None => next,
                    });
                }
                key.unwrap_or_else(|| StorageKey::named("Unreachable", "key"))
            })
    }

    pub fn arb_key_material() -> impl Strategy<Value = KeyMaterial> {
        let leaf = prop_oneof![
            "[a-z0-9]{1,16}".prop_map(KeyMaterial::Name),
            any::<i64>().prop_map(KeyMaterial::Int),
            arb_storage_key().prop_map(KeyMaterial::Key),
        ];
        leaf.prop_recursive(2, 8, 3, |inner| {
            prop::collection::vec(inner, 1..=3).prop_map(KeyMaterial::Composite)
        })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cachet error variants.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &CachetResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &CachetResult<T>) {
        match result {
            Err(CachetError::Store(StoreError::NotFound { .. })) => {}
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_invalid_key_material<T: std::fmt::Debug>(result: &CachetResult<T>) {
        match result {
            Err(CachetError::Key(KeyError::InvalidKeyMaterial { .. })) => {}
            other => panic!("Expected InvalidKeyMaterial error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_payload_too_large<T: std::fmt::Debug>(result: &CachetResult<T>) {
        match result {
            Err(CachetError::Cache(CacheError::PayloadTooLarge { .. })) => {}
            other => panic!("Expected PayloadTooLarge error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_cancelled<T: std::fmt::Debug>(result: &CachetResult<T>) {
        match result {
            Err(CachetError::Context(ContextError::Cancelled)) => {}
            other => panic!("Expected Cancelled error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_deadline_exceeded<T: std::fmt::Debug>(result: &CachetResult<T>) {
        match result {
            Err(CachetError::Context(ContextError::DeadlineExceeded { .. })) => {}
            other => panic!("Expected DeadlineExceeded error, got: {:?}", other),
        }
    }

    /// Assert the injected store failure came back unchanged.
    #[track_caller]
    pub fn assert_store_backend<T: std::fmt::Debug>(result: &CachetResult<T>, operation: &str) {
        match result {
            Err(CachetError::Store(StoreError::Backend { operation: op, .. })) => {
                assert_eq!(op, operation, "Wrong operation in store failure");
            }
            other => panic!("Expected store {} failure, got: {:?}", operation, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::generators::*;
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_call_log_is_shared_and_ordered() {
        let harness = Harness::new();
        let ctx = RequestContext::new();
        harness.cache.set(&ctx, "k", b"v".to_vec(), None).await.unwrap();
        harness
            .store
            .put(&ctx, &StorageKey::numeric("Counter", 1), serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(harness.log.labels(), vec!["cache.set", "store.put"]);
        harness.log.clear();
        assert!(harness.log.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_are_logged() {
        let log = CallLog::new();
        let store = RecordingStore::new(log.clone());
        store.fail_gets(true);

        let result = store
            .get(&RequestContext::new(), &StorageKey::numeric("Counter", 1))
            .await;
        assertions::assert_store_backend(&result, "get");
        assert_eq!(log.count("store.get"), 1);
    }

    #[test]
    fn test_opaque_blob_size_is_exact() {
        assert_eq!(OpaqueBlob::sized(1024).encode().unwrap().len(), 1024);
    }

    #[test]
    fn test_counter_nests_under_parent() {
        let ctx = RequestContext::new();
        let parent = StorageKey::named("Profile", "alice");
        let material = KeyMaterial::Composite(vec![KeyMaterial::Key(parent.clone()), KeyMaterial::Int(3)]);
        let key = Counter::default().derive_key(&ctx, &material).unwrap();
        assert_eq!(key.parent(), Some(parent));
        assert_eq!(key.int_id(), 3);
    }

    proptest! {
        #[test]
        fn prop_generated_keys_are_complete(key in arb_storage_key()) {
            prop_assert!(key.validate_for_lookup().is_ok());
        }

        #[test]
        fn prop_generated_material_has_a_shape(material in arb_key_material()) {
            prop_assert!(!material.shape().is_empty());
        }
    }
}
