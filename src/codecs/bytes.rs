use crate::types::{DataType, Endian};
use serde::{Deserialize, Serialize};

/// Array-to-bytes codec for fixed-size elements.
///
/// Chunks are held in memory as element bytes already in the recorded byte
/// order, so encoding and decoding are the identity; the endianness only
/// matters when the bytes are interpreted as typed values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytesCodec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endian: Option<Endian>,
}

impl Default for BytesCodec {
    fn default() -> Self {
        Self {
            endian: Some(Endian::Little),
        }
    }
}

impl BytesCodec {
    pub fn new(endian: Endian) -> Self {
        Self {
            endian: Some(endian),
        }
    }

    /// Little-endian unless the element type is a single byte, in which
    /// case the endianness is omitted from the metadata.
    pub fn for_data_type(dtype: DataType) -> Self {
        if dtype.byte_size() == 1 {
            Self { endian: None }
        } else {
            Self::default()
        }
    }

    pub fn effective_endian(&self) -> Endian {
        self.endian.unwrap_or(Endian::Little)
    }
}

// Custom serde for Endian so it works in JSON configs
impl Serialize for Endian {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Endian::Little => serializer.serialize_str("little"),
            Endian::Big => serializer.serialize_str("big"),
            Endian::NotApplicable => serializer.serialize_str("not_applicable"),
        }
    }
}

impl<'de> Deserialize<'de> for Endian {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "little" => Ok(Endian::Little),
            "big" => Ok(Endian::Big),
            "not_applicable" | "na" | "" => Ok(Endian::NotApplicable),
            other => Err(serde::de::Error::custom(format!(
                "Unknown endian: {other}"
            ))),
        }
    }
}
