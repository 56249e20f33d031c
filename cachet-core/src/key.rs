//! Storage keys, their canonical cache-key encoding, and caller key material.
//!
//! A [`StorageKey`] is a namespace plus a path of `(kind, id)` segments, root
//! first. The last segment identifies the record; earlier segments are its
//! ancestors. Keys can only be built through the constructors here, which
//! normalise the reserved zero identifier into [`KeyId::Incomplete`].
//!
//! # Canonical Encoding
//!
//! [`StorageKey::encode`] produces the cache key: URL-safe base64 (no padding)
//! of the following big-endian layout:
//!
//! - `[version: u8 = 1]`
//! - `[namespace_len: u32][namespace bytes]`
//! - `[segment_count: u32]`, then per segment:
//!   `[kind_len: u32][kind bytes][tag: u8][id payload]`
//!   where tag `0` = incomplete (no payload), `1` = integer (`i64`),
//!   `2` = name (`[len: u32][bytes]`).
//!
//! The layout is length-prefixed, so distinct keys never share an encoding.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{CachetError, CachetResult, KeyError};

/// Version byte leading every encoded key.
const ENCODING_VERSION: u8 = 1;

const TAG_INCOMPLETE: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_NAME: u8 = 2;

/// Identifier of a single key segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyId {
    /// No identifier yet; the durable store allocates one on put.
    Incomplete,
    /// Numeric identifier. Never zero.
    Int(i64),
    /// String identifier. Never empty.
    Name(String),
}

impl KeyId {
    /// Build an integer id; `0` is the reserved sentinel and becomes `Incomplete`.
    pub fn from_int(id: i64) -> Self {
        if id == 0 {
            KeyId::Incomplete
        } else {
            KeyId::Int(id)
        }
    }

    /// Build a name id; the empty string becomes `Incomplete`.
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() {
            KeyId::Incomplete
        } else {
            KeyId::Name(name)
        }
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, KeyId::Incomplete)
    }
}

/// One `(kind, id)` step of a key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeySegment {
    kind: String,
    id: KeyId,
}

/// Canonical identifier for a record in the durable store.
///
/// The private inner struct keeps construction behind the constructors below,
/// so the zero-id normalisation cannot be bypassed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    inner: KeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeyInner {
    namespace: String,
    /// Root first; never empty.
    path: Vec<KeySegment>,
}

impl StorageKey {
    /// Create a key in `namespace` with the given kind and id.
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>, id: KeyId) -> Self {
        Self {
            inner: KeyInner {
                namespace: namespace.into(),
                path: vec![KeySegment {
                    kind: kind.into(),
                    id,
                }],
            },
        }
    }

    /// Key with a string id in the default namespace.
    pub fn named(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new("", kind, KeyId::from_name(name))
    }

    /// Key with an integer id in the default namespace.
    pub fn numeric(kind: impl Into<String>, id: i64) -> Self {
        Self::new("", kind, KeyId::from_int(id))
    }

    /// Key whose id the durable store will allocate.
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self::new("", kind, KeyId::Incomplete)
    }

    /// Place this key under `parent`. The parent's path becomes this key's
    /// ancestry.
    ///
    /// A key has one namespace for its whole path, so a parent from another
    /// namespace is rejected with `InvalidKeyMaterial`.
    pub fn with_parent(mut self, parent: &StorageKey) -> CachetResult<Self> {
        if parent.namespace() != self.namespace() {
            return Err(CachetError::invalid_key_material(format!(
                "parent {} is in namespace {:?}, child is in {:?}",
                parent,
                parent.namespace(),
                self.namespace()
            )));
        }
        let leaf = self.leaf().clone();
        let mut path = parent.inner.path.clone();
        path.push(leaf);
        self.inner.path = path;
        Ok(self)
    }

    /// Move this key (and its ancestry) into another namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.inner.namespace = namespace.into();
        self
    }

    /// Replace the leaf id, typically with one allocated by the store.
    pub fn with_id(mut self, id: KeyId) -> Self {
        if let Some(leaf) = self.inner.path.last_mut() {
            leaf.id = id;
        }
        self
    }

    fn leaf(&self) -> &KeySegment {
        // Constructors always push one segment.
        &self.inner.path[self.inner.path.len() - 1]
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn kind(&self) -> &str {
        &self.leaf().kind
    }

    pub fn id(&self) -> &KeyId {
        &self.leaf().id
    }

    /// Integer id, or `0` when the id is not numeric.
    pub fn int_id(&self) -> i64 {
        match self.id() {
            KeyId::Int(id) => *id,
            _ => 0,
        }
    }

    /// String id, or `""` when the id is not a name.
    pub fn string_id(&self) -> &str {
        match self.id() {
            KeyId::Name(name) => name,
            _ => "",
        }
    }

    /// Parent key, if this key has ancestry.
    pub fn parent(&self) -> Option<StorageKey> {
        if self.inner.path.len() < 2 {
            return None;
        }
        Some(Self {
            inner: KeyInner {
                namespace: self.inner.namespace.clone(),
                path: self.inner.path[..self.inner.path.len() - 1].to_vec(),
            },
        })
    }

    /// Whether the leaf id is still unassigned.
    pub fn is_incomplete(&self) -> bool {
        self.id().is_incomplete()
    }

    fn has_incomplete_ancestor(&self) -> bool {
        let ancestors = &self.inner.path[..self.inner.path.len() - 1];
        ancestors.iter().any(|s| s.id.is_incomplete())
    }

    /// Check the key can address an existing record.
    ///
    /// Every segment, leaf included, must carry a real id. The zero sentinel
    /// must never resolve to whatever record a backend keeps under it.
    pub fn validate_for_lookup(&self) -> CachetResult<()> {
        if self.is_incomplete() || self.has_incomplete_ancestor() {
            return Err(CachetError::invalid_key_material(format!(
                "{} has no identifier; the zero id is reserved",
                self
            )));
        }
        self.validate_kinds()
    }

    /// Check the key can be written. The leaf may be incomplete; ancestors may not.
    pub fn validate_for_write(&self) -> CachetResult<()> {
        if self.has_incomplete_ancestor() {
            return Err(CachetError::invalid_key_material(format!(
                "{} has an incomplete ancestor",
                self
            )));
        }
        self.validate_kinds()
    }

    fn validate_kinds(&self) -> CachetResult<()> {
        if self.inner.path.iter().any(|s| s.kind.is_empty()) {
            return Err(CachetError::invalid_key_material(format!(
                "{} has an empty kind",
                self
            )));
        }
        Ok(())
    }

    /// Deterministic binary form of the key.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.push(ENCODING_VERSION);
        put_str(&mut out, &self.inner.namespace);
        out.extend_from_slice(&(self.inner.path.len() as u32).to_be_bytes());
        for segment in &self.inner.path {
            put_str(&mut out, &segment.kind);
            match &segment.id {
                KeyId::Incomplete => out.push(TAG_INCOMPLETE),
                KeyId::Int(id) => {
                    out.push(TAG_INT);
                    out.extend_from_slice(&id.to_be_bytes());
                }
                KeyId::Name(name) => {
                    out.push(TAG_NAME);
                    put_str(&mut out, name);
                }
            }
        }
        out
    }

    /// Parse the binary form produced by [`StorageKey::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut reader = Reader { bytes, pos: 0 };
        if reader.u8()? != ENCODING_VERSION {
            return None;
        }
        let namespace = reader.string()?;
        let count = reader.u32()? as usize;
        if count == 0 {
            return None;
        }
        let mut path = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            let kind = reader.string()?;
            let id = match reader.u8()? {
                TAG_INCOMPLETE => KeyId::Incomplete,
                TAG_INT => KeyId::from_int(i64::from_be_bytes(reader.take(8)?.try_into().ok()?)),
                TAG_NAME => KeyId::from_name(reader.string()?),
                _ => return None,
            };
            path.push(KeySegment { kind, id });
        }
        if reader.pos != bytes.len() {
            return None;
        }
        Some(Self {
            inner: KeyInner { namespace, path },
        })
    }

    /// Canonical cache key string.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    /// Recover a key from its canonical cache key string.
    pub fn decode(encoded: &str) -> CachetResult<Self> {
        let malformed = |reason: &str| -> CachetError {
            KeyError::Malformed {
                encoded: encoded.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| malformed(&e.to_string()))?;
        Self::from_bytes(&bytes).ok_or_else(|| malformed("invalid key layout"))
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.inner.namespace.is_empty() {
            write!(f, "[{}]", self.inner.namespace)?;
        }
        for segment in &self.inner.path {
            match &segment.id {
                KeyId::Incomplete => write!(f, "/{},?", segment.kind)?,
                KeyId::Int(id) => write!(f, "/{},{}", segment.kind, id)?,
                KeyId::Name(name) => write!(f, "/{},{:?}", segment.kind, name)?,
            }
        }
        Ok(())
    }
}

impl FromStr for StorageKey {
    type Err = CachetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_be_bytes(self.take(4)?.try_into().ok()?))
    }

    fn string(&mut self) -> Option<String> {
        let len = self.u32()? as usize;
        String::from_utf8(self.take(len)?.to_vec()).ok()
    }
}

// ============================================================================
// KEY MATERIAL
// ============================================================================

/// Caller-supplied value from which a record derives its [`StorageKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    Name(String),
    Int(i64),
    Key(StorageKey),
    Composite(Vec<KeyMaterial>),
}

impl KeyMaterial {
    /// Short description of the material's shape, for error messages.
    pub fn shape(&self) -> &'static str {
        match self {
            KeyMaterial::Name(_) => "name",
            KeyMaterial::Int(_) => "integer",
            KeyMaterial::Key(_) => "storage key",
            KeyMaterial::Composite(_) => "composite",
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            KeyMaterial::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            KeyMaterial::Int(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&StorageKey> {
        match self {
            KeyMaterial::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn as_composite(&self) -> Option<&[KeyMaterial]> {
        match self {
            KeyMaterial::Composite(parts) => Some(parts),
            _ => None,
        }
    }

    /// The name, or an `InvalidKeyMaterial` error naming the actual shape.
    pub fn expect_name(&self) -> CachetResult<&str> {
        self.as_name().ok_or_else(|| self.unexpected("name"))
    }

    /// The integer, or an `InvalidKeyMaterial` error naming the actual shape.
    pub fn expect_int(&self) -> CachetResult<i64> {
        self.as_int().ok_or_else(|| self.unexpected("integer"))
    }

    /// The composite parts, or an `InvalidKeyMaterial` error naming the actual shape.
    pub fn expect_composite(&self) -> CachetResult<&[KeyMaterial]> {
        self.as_composite().ok_or_else(|| self.unexpected("composite"))
    }

    fn unexpected(&self, wanted: &str) -> CachetError {
        CachetError::invalid_key_material(format!(
            "expected {} key material, got {}",
            wanted,
            self.shape()
        ))
    }
}

impl From<&str> for KeyMaterial {
    fn from(value: &str) -> Self {
        KeyMaterial::Name(value.to_string())
    }
}

impl From<String> for KeyMaterial {
    fn from(value: String) -> Self {
        KeyMaterial::Name(value)
    }
}

impl From<i64> for KeyMaterial {
    fn from(value: i64) -> Self {
        KeyMaterial::Int(value)
    }
}

impl From<StorageKey> for KeyMaterial {
    fn from(value: StorageKey) -> Self {
        KeyMaterial::Key(value)
    }
}

impl From<&StorageKey> for KeyMaterial {
    fn from(value: &StorageKey) -> Self {
        KeyMaterial::Key(value.clone())
    }
}

impl From<Vec<KeyMaterial>> for KeyMaterial {
    fn from(value: Vec<KeyMaterial>) -> Self {
        KeyMaterial::Composite(value)
    }
}
