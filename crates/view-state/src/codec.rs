//! Compression codec for view states.
//!
//! A state is serialized to canonical JSON (sorted keys) and compressed with
//! zlib. The zlib trailer checksum plus the recorded original size catch
//! truncated or tampered payloads, which surface as
//! [`StateError::CorruptState`].

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::envelope::{CompressedEntry, ViewState};
use crate::error::StateError;

/// Default zlib level (balanced speed/ratio).
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

const MAX_PREALLOC: usize = 1024 * 1024;

/// Serializes and compresses view states.
#[derive(Debug, Clone, Copy)]
pub struct StateCodec {
    level: Compression,
}

impl Default for StateCodec {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl StateCodec {
    /// Create a codec with a zlib level from 0 (store) to 9 (best).
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }

    /// Compress a state into a [`CompressedEntry`].
    pub fn compress(&self, state: &ViewState) -> Result<CompressedEntry, StateError> {
        let json = serde_json::to_vec(state)?;
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(json.len() / 2 + 16), self.level);
        encoder
            .write_all(&json)
            .map_err(|e| StateError::CorruptState(format!("compression failed: {e}")))?;
        let data = encoder
            .finish()
            .map_err(|e| StateError::CorruptState(format!("compression failed: {e}")))?;

        let size = data.len();
        let original_size = json.len();
        let compression_ratio = if original_size == 0 {
            1.0
        } else {
            size as f64 / original_size as f64
        };

        Ok(CompressedEntry {
            data,
            size,
            original_size,
            compression_ratio,
        })
    }

    /// Decompress an entry back into a state.
    pub fn decompress(&self, entry: &CompressedEntry) -> Result<ViewState, StateError> {
        // The recorded size is untrusted; don't let it drive the allocation.
        let mut json = Vec::with_capacity(entry.original_size.min(MAX_PREALLOC));
        ZlibDecoder::new(entry.data.as_slice())
            .read_to_end(&mut json)
            .map_err(|e| StateError::CorruptState(format!("invalid zlib stream: {e}")))?;

        if json.len() != entry.original_size {
            return Err(StateError::CorruptState(format!(
                "length mismatch: expected {} bytes, decoded {}",
                entry.original_size,
                json.len()
            )));
        }

        match serde_json::from_slice::<serde_json::Value>(&json) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(other) => Err(StateError::CorruptState(format!(
                "expected a JSON object, found {}",
                kind_name(&other)
            ))),
            Err(e) => Err(StateError::CorruptState(format!("invalid JSON: {e}"))),
        }
    }
}

fn kind_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    fn state(value: Value) -> ViewState {
        match value {
            Value::Object(map) => map,
            _ => panic!("test state must be an object"),
        }
    }

    #[test]
    fn scenario_state_roundtrips() {
        let codec = StateCodec::default();
        let s = state(json!({"selectedFiles": ["a", "b"], "scrollPosition": 120}));
        let entry = codec.compress(&s).unwrap();
        assert_eq!(codec.decompress(&entry).unwrap(), s);
        assert_eq!(entry.size, entry.data.len());
    }

    #[test]
    fn repetitive_state_shrinks() {
        let codec = StateCodec::default();
        let files: Vec<String> = (0..200).map(|i| format!("/data/reports/file-{i}.pdf")).collect();
        let s = state(json!({ "selectedFiles": files }));
        let entry = codec.compress(&s).unwrap();
        assert!(entry.size < entry.original_size);
        assert!(entry.compression_ratio < 0.5);
    }

    #[test]
    fn compression_is_deterministic() {
        let codec = StateCodec::default();
        let s = state(json!({"b": 1, "a": [true, null], "c": {"z": "x"}}));
        assert_eq!(codec.compress(&s).unwrap(), codec.compress(&s).unwrap());
    }

    #[test]
    fn garbage_payload_is_corrupt() {
        let codec = StateCodec::default();
        let entry = CompressedEntry {
            data: b"definitely not zlib".to_vec(),
            size: 19,
            original_size: 40,
            compression_ratio: 0.5,
        };
        assert!(matches!(
            codec.decompress(&entry),
            Err(StateError::CorruptState(_))
        ));
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let codec = StateCodec::default();
        let mut entry = codec
            .compress(&state(json!({"query": "quarterly revenue"})))
            .unwrap();
        entry.data.truncate(entry.data.len() / 2);
        assert!(matches!(
            codec.decompress(&entry),
            Err(StateError::CorruptState(_))
        ));
    }

    #[test]
    fn non_object_payload_is_corrupt() {
        let codec = StateCodec::default();
        let json = b"[1,2,3]";
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json).unwrap();
        let data = encoder.finish().unwrap();
        let entry = CompressedEntry {
            size: data.len(),
            data,
            original_size: json.len(),
            compression_ratio: 1.0,
        };
        let err = codec.decompress(&entry).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn floats_survive_exactly() {
        let codec = StateCodec::default();
        for f in [
            0.009042000000000001,
            1.0715660391465826e-75,
            0.1 + 0.2,
            f64::MAX,
            f64::MIN_POSITIVE,
            5e-324,
        ] {
            let s: ViewState = [("scrollPosition".to_string(), json!(f))].into_iter().collect();
            let restored = codec.decompress(&codec.compress(&s).unwrap()).unwrap();
            assert_eq!(restored["scrollPosition"].as_f64(), Some(f), "{f:e}");
        }
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            any::<f64>()
                .prop_filter("finite", |f| f.is_finite())
                .prop_map(|f| json!(f)),
            "[a-zA-Z0-9 _/.-]{0,24}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn decompress_inverts_compress(
            fields in prop::collection::btree_map("[a-zA-Z]{1,12}", arb_value(), 0..8),
            level in 0u32..=9,
        ) {
            let codec = StateCodec::new(level);
            let s: ViewState = fields.into_iter().collect();
            let entry = codec.compress(&s).unwrap();
            prop_assert_eq!(codec.decompress(&entry).unwrap(), s);
        }
    }
}
