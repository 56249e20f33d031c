//! cachet Storage - Cache-Aside Entity Store
//!
//! Backend traits for the volatile cache and the durable store, the two
//! adapters that translate entity store intent into backend calls, the
//! [`EntityStore`] orchestrator, and reference backends.

pub mod backends;
pub mod cache_adapter;
pub mod entity_store;
pub mod store_adapter;
pub mod traits;

pub use backends::{LmdbStore, LmdbStoreError, MemoryCache, MemoryCacheConfig, MemoryStore};
pub use cache_adapter::CacheAdapter;
pub use entity_store::EntityStore;
pub use store_adapter::StoreAdapter;
pub use traits::{CacheStats, Document, DurableStore, VolatileCache};
