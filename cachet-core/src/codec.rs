//! Record byte encoding for the cache.
//!
//! A record's [`CustomSerialization`](crate::CustomSerialization) always wins;
//! otherwise the default JSON encoding from `serde_json` is used.

use crate::capability::Retrievable;
use crate::error::{CachetError, CachetResult};

/// Encode `record` for the cache.
pub fn encode_record<R: Retrievable>(record: &R) -> CachetResult<Vec<u8>> {
    match record.custom_codec() {
        Some(codec) => codec.encode(),
        None => encode_default(record),
    }
}

/// Decode cache bytes into `record`.
///
/// With the default decoder `record` is left untouched on failure.
pub fn decode_record<R: Retrievable>(bytes: &[u8], record: &mut R) -> CachetResult<()> {
    match record.custom_codec_mut() {
        Some(codec) => codec.decode(bytes),
        None => {
            *record = decode_default(bytes)?;
            Ok(())
        }
    }
}

/// Default encoder.
pub fn encode_default<T: serde::Serialize + ?Sized>(value: &T) -> CachetResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(CachetError::encode)
}

/// Default decoder.
pub fn decode_default<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> CachetResult<T> {
    serde_json::from_slice(bytes).map_err(CachetError::decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CustomSerialization, KeyMaterial, RequestContext, StorageKey};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
    }

    impl Retrievable for Note {
        fn derive_key(&self, ctx: &RequestContext, material: &KeyMaterial) -> CachetResult<StorageKey> {
            Ok(ctx.named_key("Note", material.expect_name()?))
        }
    }

    /// Encodes as the raw title bytes.
    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct RawTitle {
        title: String,
    }

    impl CustomSerialization for RawTitle {
        fn encode(&self) -> CachetResult<Vec<u8>> {
            Ok(self.title.as_bytes().to_vec())
        }

        fn decode(&mut self, bytes: &[u8]) -> CachetResult<()> {
            self.title = String::from_utf8(bytes.to_vec()).map_err(CachetError::decode)?;
            Ok(())
        }
    }

    impl Retrievable for RawTitle {
        fn derive_key(&self, ctx: &RequestContext, material: &KeyMaterial) -> CachetResult<StorageKey> {
            Ok(ctx.named_key("RawTitle", material.expect_name()?))
        }

        fn custom_codec(&self) -> Option<&dyn CustomSerialization> {
            Some(self)
        }

        fn custom_codec_mut(&mut self) -> Option<&mut dyn CustomSerialization> {
            Some(self)
        }
    }

    #[test]
    fn test_default_codec_is_json() {
        let note = Note {
            title: "hello".into(),
        };
        let bytes = encode_record(&note).unwrap();
        assert_eq!(bytes, br#"{"title":"hello"}"#);

        let mut out = Note::default();
        decode_record(&bytes, &mut out).unwrap();
        assert_eq!(out, note);
    }

    #[test]
    fn test_default_decode_failure_leaves_record() {
        let mut out = Note {
            title: "keep".into(),
        };
        let err = decode_record(b"{not json", &mut out).unwrap_err();
        assert!(err.is_decode_failure());
        assert_eq!(out.title, "keep");
    }

    #[test]
    fn test_custom_codec_takes_precedence() {
        let record = RawTitle {
            title: "plain".into(),
        };
        assert_eq!(encode_record(&record).unwrap(), b"plain");

        let mut out = RawTitle::default();
        decode_record(b"from-cache", &mut out).unwrap();
        assert_eq!(out.title, "from-cache");
    }

    #[test]
    fn test_custom_decode_errors_surface() {
        let mut out = RawTitle::default();
        let err = decode_record(&[0xff, 0xfe], &mut out).unwrap_err();
        assert!(err.is_decode_failure());
    }
}
