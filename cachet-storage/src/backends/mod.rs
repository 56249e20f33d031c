//! Reference backends.
//!
//! - [`MemoryCache`]: in-process volatile cache with TTLs and a capacity bound
//! - [`MemoryStore`]: in-process durable store, mostly for tests
//! - [`LmdbStore`]: durable store persisted with LMDB

pub mod lmdb_store;
pub mod memory_cache;
pub mod memory_store;

pub use lmdb_store::{LmdbStore, LmdbStoreError};
pub use memory_cache::{MemoryCache, MemoryCacheConfig};
pub use memory_store::MemoryStore;
