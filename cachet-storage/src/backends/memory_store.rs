//! In-memory durable store for testing and embedding.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use cachet_core::{CachetResult, KeyId, RequestContext, StorageKey, StoreError};

use crate::traits::{Document, DurableStore};

/// Durable store backed by a process-local map.
#[derive(Debug)]
pub struct MemoryStore {
    documents: RwLock<HashMap<StorageKey, Document>>,
    next_id: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty store. Allocated ids start at 1.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        if let Ok(mut documents) = self.documents.write() {
            documents.clear();
        }
    }

    /// Get count of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &StorageKey) -> bool {
        self.documents
            .read()
            .map(|d| d.contains_key(key))
            .unwrap_or(false)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn put(
        &self,
        _ctx: &RequestContext,
        key: &StorageKey,
        document: Document,
    ) -> CachetResult<StorageKey> {
        let mut documents = self
            .documents
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;

        let resolved = match key.id() {
            KeyId::Incomplete => loop {
                // Skip ids a caller already wrote explicitly.
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let candidate = key.clone().with_id(KeyId::Int(id));
                if !documents.contains_key(&candidate) {
                    break candidate;
                }
            },
            KeyId::Int(id) => {
                self.next_id.fetch_max(id.saturating_add(1), Ordering::SeqCst);
                key.clone()
            }
            KeyId::Name(_) => key.clone(),
        };
        documents.insert(resolved.clone(), document);
        Ok(resolved)
    }

    async fn get(&self, _ctx: &RequestContext, key: &StorageKey) -> CachetResult<Document> {
        let documents = self
            .documents
            .read()
            .map_err(|_| StoreError::LockPoisoned)?;
        documents.get(key).cloned().ok_or_else(|| {
            StoreError::NotFound {
                key: key.to_string(),
            }
            .into()
        })
    }

    async fn delete(&self, _ctx: &RequestContext, key: &StorageKey) -> CachetResult<()> {
        let mut documents = self
            .documents
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        documents.remove(key);
        Ok(())
    }
}
