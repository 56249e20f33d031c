//! cachet Core - Keys, Capabilities and Errors
//!
//! Types shared by every cachet crate. Nothing here talks to a backend:
//! storage keys and their cache encoding, the request context that scopes
//! backend calls, the capability traits records implement, the record codec,
//! configuration, and the error taxonomy.

pub mod capability;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod key;

pub use capability::{
    assign_key, CustomSerialization, IntId, Retrievable, SelfKeyAssignment, StringId,
};
pub use codec::{decode_default, decode_record, encode_default, encode_record};
pub use config::{CachetConfig, WriteOrdering, MAX_CACHE_PAYLOAD_BYTES, MAX_EXPIRY_HORIZON};
pub use context::{CancelHandle, RequestContext};
pub use error::{
    CacheError, CachetError, CachetResult, CodecError, ConfigError, ContextError, KeyError,
    StoreError,
};
pub use key::{KeyId, KeyMaterial, StorageKey};
