//! Persisted data shapes: the versioned envelope and its per-view entries.
//!
//! The whole engine persists exactly one record, the [`Envelope`], under a
//! single well-known key. It is always written and read as a unit.
//!
//! ```json
//! {
//!   "version": "1.1",
//!   "timestamp": 1760000000000,
//!   "states": {
//!     "discovery": {
//!       "data": "eJyrVipILC5WslIqS8wpTtVRKi1OLUpVslJKzs8tSM0rUaoFAJ8NCwc=",
//!       "size": 41,
//!       "originalSize": 52,
//!       "compressionRatio": 0.788
//!     }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A view's working state: field name to dynamic value.
///
/// Backed by `serde_json::Map`, which keeps keys sorted, so serialization is
/// canonical.
pub type ViewState = serde_json::Map<String, serde_json::Value>;

/// Version written by this build of the engine.
pub const CURRENT_VERSION: SchemaVersion = SchemaVersion::new(1, 1);

// ── SchemaVersion ──────────────────────────────────────────────────

/// Dotted `major.minor` version with numeric ordering (`0.10 > 0.9`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (major, minor) = match s.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (s, "0"),
        };
        let major = major
            .parse::<u32>()
            .map_err(|_| format!("invalid version '{s}'"))?;
        let minor = minor
            .parse::<u32>()
            .map_err(|_| format!("invalid version '{s}'"))?;
        Ok(Self { major, minor })
    }
}

// ── CompressedEntry ────────────────────────────────────────────────

/// Compressed form of one view's state, as cached and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedEntry {
    /// zlib-compressed canonical JSON, base64 encoded on the wire.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Compressed size in bytes.
    pub size: usize,
    /// Size of the canonical JSON before compression.
    pub original_size: usize,
    /// `size / original_size`.
    pub compression_ratio: f64,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ── Envelope ───────────────────────────────────────────────────────

/// The single persisted record holding every known view state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// `major.minor` of the code that wrote the envelope.
    pub version: String,
    /// Epoch milliseconds of the write.
    pub timestamp: i64,
    /// View name → compressed state.
    #[serde(default)]
    pub states: BTreeMap<String, CompressedEntry>,
}

impl Envelope {
    /// Empty envelope stamped with the current version and time.
    pub fn new() -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            timestamp: epoch_millis(),
            states: BTreeMap::new(),
        }
    }

    /// Parsed version, or `None` when the recorded string is malformed.
    pub fn schema_version(&self) -> Option<SchemaVersion> {
        self.version.parse().ok()
    }

    pub fn is_current(&self) -> bool {
        self.schema_version() == Some(CURRENT_VERSION)
    }

    /// Re-stamp with the current version and time before a write.
    pub fn stamp(&mut self) {
        self.version = CURRENT_VERSION.to_string();
        self.timestamp = epoch_millis();
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

/// Current unix epoch in milliseconds.
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_compare_numerically() {
        let v09: SchemaVersion = "0.9".parse().unwrap();
        let v010: SchemaVersion = "0.10".parse().unwrap();
        let v11: SchemaVersion = "1.1".parse().unwrap();
        assert!(v010 > v09);
        assert!(v11 > v010);
        // Lexicographic ordering would get this wrong.
        assert!("0.10" < "0.9");
    }

    #[test]
    fn bare_major_parses_as_minor_zero() {
        assert_eq!("2".parse::<SchemaVersion>(), Ok(SchemaVersion::new(2, 0)));
    }

    #[test]
    fn malformed_versions_rejected() {
        assert!("one.two".parse::<SchemaVersion>().is_err());
        assert!("1.x".parse::<SchemaVersion>().is_err());
        assert!("".parse::<SchemaVersion>().is_err());
    }

    #[test]
    fn envelope_wire_shape_uses_camel_case_and_base64() {
        let mut envelope = Envelope::new();
        envelope.states.insert(
            "discovery".into(),
            CompressedEntry {
                data: vec![1, 2, 3],
                size: 3,
                original_size: 6,
                compression_ratio: 0.5,
            },
        );
        let json: serde_json::Value =
            serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(json["version"], "1.1");
        assert_eq!(json["states"]["discovery"]["data"], "AQID");
        assert_eq!(json["states"]["discovery"]["originalSize"], 6);
        assert_eq!(json["states"]["discovery"]["compressionRatio"], 0.5);
    }

    #[test]
    fn envelope_without_states_parses_empty() {
        let envelope = Envelope::from_bytes(br#"{"version":"1.0","timestamp":5}"#).unwrap();
        assert!(envelope.states.is_empty());
        assert!(!envelope.is_current());
    }
}
