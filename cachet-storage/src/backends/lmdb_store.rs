//! LMDB-backed durable store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to persist property documents
//! in a memory-mapped file.
//!
//! # Layout
//!
//! Two named databases live in one environment:
//! - `records`: `StorageKey::to_bytes()` → JSON document
//! - `sequences`: `[namespace_len: u32][namespace][kind]` → last allocated id (`i64`, big-endian)
//!
//! Id allocation and the record write share one write transaction, so an
//! allocated id is never handed out twice.

use std::path::Path;

use async_trait::async_trait;
use cachet_core::{
    CachetError, CachetResult, CodecError, KeyId, RequestContext, StorageKey, StoreError,
};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RwTxn};

use crate::traits::{Document, DurableStore};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbStoreError to CachetError.
impl From<LmdbStoreError> for CachetError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Deserialization(reason) => CodecError::Decode { reason }.into(),
            LmdbStoreError::Serialization(reason) => CodecError::Encode { reason }.into(),
            other => StoreError::Backend {
                operation: "lmdb".to_string(),
                reason: other.to_string(),
            }
            .into(),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// Durable store persisted in an LMDB environment.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(LmdbStore::new("/var/lib/app/records", 256)?);
/// let entities = EntityStore::with_defaults(Arc::new(MemoryCache::new()), store);
/// ```
pub struct LmdbStore {
    env: Env,
    records: Database<Bytes, Bytes>,
    sequences: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Open (or create) a store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let records: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("records"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let sequences: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("sequences"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            records,
            sequences,
        })
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<u64, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.records.len(&rtxn).map_err(txn_err)
    }

    pub fn is_empty(&self) -> Result<bool, LmdbStoreError> {
        Ok(self.len()? == 0)
    }

    fn sequence_key(key: &StorageKey) -> Vec<u8> {
        let namespace = key.namespace().as_bytes();
        let mut out = Vec::with_capacity(4 + namespace.len() + key.kind().len());
        out.extend_from_slice(&(namespace.len() as u32).to_be_bytes());
        out.extend_from_slice(namespace);
        out.extend_from_slice(key.kind().as_bytes());
        out
    }

    fn read_sequence(&self, wtxn: &RwTxn<'_>, seq_key: &[u8]) -> Result<i64, LmdbStoreError> {
        match self.sequences.get(wtxn, seq_key).map_err(txn_err)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| LmdbStoreError::Deserialization("Invalid sequence value".into()))?;
                Ok(i64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    /// Resolve `key` to a free id for its namespace and kind.
    ///
    /// Ids already taken by explicit puts are skipped; the sequence is left
    /// at the id handed out.
    fn allocate_id(&self, wtxn: &mut RwTxn<'_>, key: &StorageKey) -> Result<StorageKey, LmdbStoreError> {
        let seq_key = Self::sequence_key(key);
        let mut next = self.read_sequence(wtxn, &seq_key)?;
        let resolved = loop {
            next = next
                .checked_add(1)
                .ok_or_else(|| LmdbStoreError::Transaction("id sequence exhausted".into()))?;
            let candidate = key.clone().with_id(KeyId::Int(next));
            let taken = self
                .records
                .get(wtxn, candidate.to_bytes().as_slice())
                .map_err(txn_err)?
                .is_some();
            if !taken {
                break candidate;
            }
        };
        self.sequences
            .put(wtxn, seq_key.as_slice(), &next.to_be_bytes())
            .map_err(txn_err)?;
        Ok(resolved)
    }

    /// Raise the sequence so later allocations start above an explicit `id`.
    fn observe_id(&self, wtxn: &mut RwTxn<'_>, key: &StorageKey, id: i64) -> Result<(), LmdbStoreError> {
        let seq_key = Self::sequence_key(key);
        if id > self.read_sequence(wtxn, &seq_key)? {
            self.sequences
                .put(wtxn, seq_key.as_slice(), &id.to_be_bytes())
                .map_err(txn_err)?;
        }
        Ok(())
    }

    fn put_sync(&self, key: &StorageKey, document: &Document) -> Result<StorageKey, LmdbStoreError> {
        let value =
            serde_json::to_vec(document).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let resolved = match key.id() {
            KeyId::Incomplete => self.allocate_id(&mut wtxn, key)?,
            KeyId::Int(id) => {
                self.observe_id(&mut wtxn, key, *id)?;
                key.clone()
            }
            KeyId::Name(_) => key.clone(),
        };
        self.records
            .put(&mut wtxn, resolved.to_bytes().as_slice(), value.as_slice())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        Ok(resolved)
    }

    fn get_sync(&self, key: &StorageKey) -> Result<Option<Document>, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self
            .records
            .get(&rtxn, key.to_bytes().as_slice())
            .map_err(txn_err)?
        {
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| LmdbStoreError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn delete_sync(&self, key: &StorageKey) -> Result<bool, LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self
            .records
            .delete(&mut wtxn, key.to_bytes().as_slice())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }
}

#[async_trait]
impl DurableStore for LmdbStore {
    async fn put(
        &self,
        _ctx: &RequestContext,
        key: &StorageKey,
        document: Document,
    ) -> CachetResult<StorageKey> {
        Ok(self.put_sync(key, &document)?)
    }

    async fn get(&self, _ctx: &RequestContext, key: &StorageKey) -> CachetResult<Document> {
        self.get_sync(key)?.ok_or_else(|| {
            StoreError::NotFound {
                key: key.to_string(),
            }
            .into()
        })
    }

    async fn delete(&self, _ctx: &RequestContext, key: &StorageKey) -> CachetResult<()> {
        self.delete_sync(key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::new(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (store, _dir) = create_test_store();
        let ctx = RequestContext::new();
        let key = StorageKey::named("Profile", "alice").with_namespace("tenant-a");

        let resolved = store
            .put(&ctx, &key, json!({"display_name": "Alice"}))
            .await
            .expect("put should succeed");
        assert_eq!(resolved, key);

        let document = store.get(&ctx, &key).await.expect("get should succeed");
        assert_eq!(document, json!({"display_name": "Alice"}));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (store, _dir) = create_test_store();
        let err = store
            .get(&RequestContext::new(), &StorageKey::numeric("Counter", 3))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, _dir) = create_test_store();
        let ctx = RequestContext::new();
        let key = StorageKey::numeric("Counter", 3);

        store.put(&ctx, &key, json!({"count": 1})).await.unwrap();
        store.delete(&ctx, &key).await.unwrap();
        store.delete(&ctx, &key).await.unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_sequences_are_per_namespace_and_kind() {
        let (store, _dir) = create_test_store();
        let ctx = RequestContext::new();

        let a1 = store.put(&ctx, &StorageKey::incomplete("A"), json!({})).await.unwrap();
        let a2 = store.put(&ctx, &StorageKey::incomplete("A"), json!({})).await.unwrap();
        let b1 = store.put(&ctx, &StorageKey::incomplete("B"), json!({})).await.unwrap();
        let other_ns = store
            .put(&ctx, &StorageKey::incomplete("A").with_namespace("x"), json!({}))
            .await
            .unwrap();

        assert_eq!((a1.int_id(), a2.int_id(), b1.int_id()), (1, 2, 1));
        assert_eq!(other_ns.int_id(), 1);
        assert_eq!(store.len().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_allocation_never_overwrites_explicit_ids() {
        let (store, _dir) = create_test_store();
        let ctx = RequestContext::new();
        let explicit = StorageKey::numeric("Counter", 1);
        store.put(&ctx, &explicit, json!({"count": 111})).await.unwrap();

        let allocated = store
            .put(&ctx, &StorageKey::incomplete("Counter"), json!({"count": 222}))
            .await
            .unwrap();

        assert_eq!(allocated.int_id(), 2);
        assert_eq!(store.get(&ctx, &explicit).await.unwrap(), json!({"count": 111}));
        assert_eq!(store.get(&ctx, &allocated).await.unwrap(), json!({"count": 222}));
    }

    #[tokio::test]
    async fn test_explicit_ids_raise_sequence() {
        let (store, _dir) = create_test_store();
        let ctx = RequestContext::new();
        store
            .put(&ctx, &StorageKey::numeric("Counter", 2), json!({"count": 2}))
            .await
            .unwrap();
        // Negative ids do not move the sequence.
        store
            .put(&ctx, &StorageKey::numeric("Counter", -7), json!({}))
            .await
            .unwrap();

        let first = store.put(&ctx, &StorageKey::incomplete("Counter"), json!({})).await.unwrap();
        assert_eq!(first.int_id(), 3);
        assert_eq!(
            store.get(&ctx, &StorageKey::numeric("Counter", 2)).await.unwrap(),
            json!({"count": 2})
        );
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = RequestContext::new();
        let key = {
            let store = LmdbStore::new(temp_dir.path(), 10).unwrap();
            store
                .put(&ctx, &StorageKey::incomplete("Counter"), json!({"count": 7}))
                .await
                .unwrap()
        };

        let store = LmdbStore::new(temp_dir.path(), 10).unwrap();
        assert_eq!(store.get(&ctx, &key).await.unwrap(), json!({"count": 7}));

        // The sequence survives too.
        let next = store
            .put(&ctx, &StorageKey::incomplete("Counter"), json!({}))
            .await
            .unwrap();
        assert_eq!(next.int_id(), key.int_id() + 1);
    }

    #[test]
    fn test_deserialization_error_maps_to_decode_failure() {
        let err: CachetError = LmdbStoreError::Deserialization("bad".into()).into();
        assert!(err.is_decode_failure());

        let err: CachetError = LmdbStoreError::Transaction("MDB_MAP_FULL".into()).into();
        assert!(matches!(err, CachetError::Store(StoreError::Backend { .. })));
    }
}
