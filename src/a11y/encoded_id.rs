use crate::error::{sanitize, BrowserError};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Composite element identity `"{frameIndex}-{backendNodeId}"`.
///
/// This string format is a documented, stable contract: other subsystems
/// parse it directly. An EncodedId is only meaningful within the snapshot
/// generation that produced it; navigation invalidates it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncodedId {
    pub frame_index: u64,
    pub backend_node_id: u64,
}

impl EncodedId {
    pub fn new(frame_index: u64, backend_node_id: u64) -> Self {
        Self {
            frame_index,
            backend_node_id,
        }
    }
}

impl fmt::Display for EncodedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.frame_index, self.backend_node_id)
    }
}

impl FromStr for EncodedId {
    type Err = BrowserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BrowserError::InvalidEncodedId(sanitize(s));

        let (frame, backend) = s.split_once('-').ok_or_else(invalid)?;
        let frame_index: u64 = frame.parse().map_err(|_| invalid())?;
        let backend_node_id: u64 = backend.parse().map_err(|_| invalid())?;

        Ok(Self {
            frame_index,
            backend_node_id,
        })
    }
}

impl Serialize for EncodedId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EncodedId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(|_| {
            D::Error::custom(format!("invalid encoded id '{}'", sanitize(&raw)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_are_exact_inverses() {
        let cases = [
            (0u64, 0u64),
            (0, 501),
            (1, 42),
            (17, 9_999_999),
            (u64::MAX, u64::MAX),
        ];

        for (frame, backend) in cases {
            let id = EncodedId::new(frame, backend);
            let round_tripped: EncodedId = id.to_string().parse().unwrap();
            assert_eq!(round_tripped, id);
            assert_eq!(round_tripped.frame_index, frame);
            assert_eq!(round_tripped.backend_node_id, backend);
        }
    }

    #[test]
    fn test_display_format() {
        assert_eq!(EncodedId::new(0, 501).to_string(), "0-501");
        assert_eq!(EncodedId::new(3, 12).to_string(), "3-12");
    }

    #[test]
    fn test_malformed_inputs_are_named_errors() {
        for bad in ["", "abc", "1", "1-", "-5", "1-2-3x", "a-b", "1.5-2", " 1-2"] {
            let result: Result<EncodedId, _> = bad.parse();
            match result {
                Err(BrowserError::InvalidEncodedId(_)) => {}
                other => panic!("expected InvalidEncodedId for '{bad}', got {other:?}"),
            }
        }
    }

    #[test]
    fn test_serde_round_trip_as_string() {
        let id = EncodedId::new(2, 77);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"2-77\"");

        let back: EncodedId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        let result: Result<EncodedId, _> = serde_json::from_str("\"not-an-id\"");
        assert!(result.is_err());
    }
}
