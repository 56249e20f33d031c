//! Capability contracts a record type implements to go through the entity store.
//!
//! [`Retrievable::derive_key`] is mandatory. Self key assignment and custom
//! serialization are optional: a record opts in by overriding the matching
//! accessor, and the store asks for each capability once per operation.
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! struct Profile {
//!     display_name: String,
//!     #[serde(skip)]
//!     id: StringId,
//! }
//!
//! impl Retrievable for Profile {
//!     fn derive_key(&self, ctx: &RequestContext, material: &KeyMaterial) -> CachetResult<StorageKey> {
//!         Ok(ctx.named_key("Profile", material.expect_name()?))
//!     }
//!
//!     fn key_slot(&mut self) -> Option<&mut dyn SelfKeyAssignment> {
//!         Some(&mut self.id)
//!     }
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::CachetResult;
use crate::key::{KeyMaterial, StorageKey};

/// A record that can be stored and cached.
///
/// Implementations must be `Serialize` and `DeserializeOwned` because the
/// durable store persists them as property documents, and the default cache
/// encoder uses the same representation.
pub trait Retrievable: Serialize + DeserializeOwned + Send + Sync {
    /// Derive the storage key for `material` in `ctx`.
    ///
    /// Must be deterministic. Unsupported material shapes are a caller bug
    /// and should fail with `InvalidKeyMaterial`.
    fn derive_key(&self, ctx: &RequestContext, material: &KeyMaterial) -> CachetResult<StorageKey>;

    /// Where the resolved key should be written back, if anywhere.
    fn key_slot(&mut self) -> Option<&mut dyn SelfKeyAssignment> {
        None
    }

    /// The record's own cache encoder, if it has one.
    fn custom_codec(&self) -> Option<&dyn CustomSerialization> {
        None
    }

    /// The record's own cache decoder, if it has one.
    fn custom_codec_mut(&mut self) -> Option<&mut dyn CustomSerialization> {
        None
    }
}

/// Accepts a resolved storage key into the record's own state.
pub trait SelfKeyAssignment {
    fn assign_key(&mut self, key: &StorageKey);
}

/// A record-specific cache byte encoding.
pub trait CustomSerialization {
    /// Encode the current state. Must be deterministic.
    fn encode(&self) -> CachetResult<Vec<u8>>;

    /// Replace the current state from `bytes`, or fail with a decode error.
    fn decode(&mut self, bytes: &[u8]) -> CachetResult<()>;
}

/// Write `key` back into `record` if it supports self key assignment.
///
/// Returns whether the record accepted the key.
pub fn assign_key<R: Retrievable>(record: &mut R, key: &StorageKey) -> bool {
    match record.key_slot() {
        Some(slot) => {
            slot.assign_key(key);
            true
        }
        None => false,
    }
}

/// Integer id field that tracks the record's own key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntId(pub i64);

impl SelfKeyAssignment for IntId {
    fn assign_key(&mut self, key: &StorageKey) {
        self.0 = key.int_id();
    }
}

/// String id field that tracks the record's own key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringId(pub String);

impl SelfKeyAssignment for StringId {
    fn assign_key(&mut self, key: &StorageKey) {
        self.0 = key.string_id().to_string();
    }
}

impl SelfKeyAssignment for Option<StorageKey> {
    fn assign_key(&mut self, key: &StorageKey) {
        *self = Some(key.clone());
    }
}
