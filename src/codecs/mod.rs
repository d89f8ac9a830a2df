pub mod blosc;
pub mod bytes;
pub mod checksum;
pub mod compression;
pub mod sharding;

pub use compression::Compression;

use crate::error::{ZarrError, ZarrResult};
use crate::types::{DataType, Endian};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::future::Future;
use std::pin::Pin;

// ---------------------------------------------------------------------------
// CodecId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    Bytes,
    Gzip,
    Blosc,
    Zlib,
    Zstd,
    Lz4,
    Crc32c,
    Sharding,
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecId::Bytes => write!(f, "bytes"),
            CodecId::Gzip => write!(f, "gzip"),
            CodecId::Blosc => write!(f, "blosc"),
            CodecId::Zlib => write!(f, "numcodecs.zlib"),
            CodecId::Zstd => write!(f, "zstd"),
            CodecId::Lz4 => write!(f, "numcodecs.lz4"),
            CodecId::Crc32c => write!(f, "crc32c"),
            CodecId::Sharding => write!(f, "sharding_indexed"),
        }
    }
}

/// Map a codec name string to its [`CodecId`].
pub fn lookup_codec_id(name: &str) -> Option<CodecId> {
    match name {
        "bytes" => Some(CodecId::Bytes),
        "gzip" => Some(CodecId::Gzip),
        "blosc" => Some(CodecId::Blosc),
        "zlib" | "numcodecs.zlib" => Some(CodecId::Zlib),
        "zstd" => Some(CodecId::Zstd),
        "lz4" | "numcodecs.lz4" => Some(CodecId::Lz4),
        "crc32c" => Some(CodecId::Crc32c),
        "sharding_indexed" => Some(CodecId::Sharding),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// AnyCodec  (enum dispatch, no Box<dyn>)
// ---------------------------------------------------------------------------

/// One entry of a codec pipeline.
///
/// `Bytes` and `Sharding` are array-to-bytes codecs; every other variant is
/// a bytes-to-bytes transform.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyCodec {
    Bytes(bytes::BytesCodec),
    Gzip(compression::GzipCodec),
    Blosc(blosc::BloscCodec),
    Zlib(compression::ZlibCodec),
    Zstd(compression::ZstdCodec),
    Lz4(compression::Lz4Codec),
    Crc32c(checksum::Crc32cCodec),
    Sharding(sharding::ShardingCodec),
}

impl AnyCodec {
    pub fn codec_id(&self) -> CodecId {
        match self {
            AnyCodec::Bytes(_) => CodecId::Bytes,
            AnyCodec::Gzip(_) => CodecId::Gzip,
            AnyCodec::Blosc(_) => CodecId::Blosc,
            AnyCodec::Zlib(_) => CodecId::Zlib,
            AnyCodec::Zstd(_) => CodecId::Zstd,
            AnyCodec::Lz4(_) => CodecId::Lz4,
            AnyCodec::Crc32c(_) => CodecId::Crc32c,
            AnyCodec::Sharding(_) => CodecId::Sharding,
        }
    }

    pub fn is_array_to_bytes(&self) -> bool {
        matches!(self, AnyCodec::Bytes(_) | AnyCodec::Sharding(_))
    }

    /// The compression step this codec performs, if it is a compressor.
    pub fn compression(&self) -> Option<Compression> {
        match self {
            AnyCodec::Gzip(c) => Some(Compression::new("gzip", c.level as i32)),
            AnyCodec::Zlib(c) => Some(Compression::new("zlib", c.level as i32)),
            AnyCodec::Zstd(c) => Some(Compression::new("zstd", c.level)),
            AnyCodec::Lz4(c) => Some(Compression::new("lz4", c.acceleration)),
            AnyCodec::Blosc(c) => Some(Compression::new(format!("blosc-{}", c.cname), c.clevel)),
            AnyCodec::Bytes(_) | AnyCodec::Crc32c(_) | AnyCodec::Sharding(_) => None,
        }
    }

    /// Build the compressor named by `compression`.
    ///
    /// Accepts `gzip`, `zlib`, `zstd`, `lz4`, `blosc` and `blosc-<cname>`.
    pub fn from_compression(compression: &Compression) -> ZarrResult<Self> {
        let name = compression.name.to_lowercase();
        let level = compression.level;
        let unsigned = || {
            u32::try_from(level).map_err(|_| {
                ZarrError::Codec(format!("{name} level must be non-negative, got {level}"))
            })
        };
        match name.as_str() {
            "gzip" => Ok(AnyCodec::Gzip(compression::GzipCodec {
                level: unsigned()?.min(9),
            })),
            "zlib" => Ok(AnyCodec::Zlib(compression::ZlibCodec {
                level: unsigned()?.min(9),
            })),
            "zstd" => Ok(AnyCodec::Zstd(compression::ZstdCodec {
                level,
                checksum: false,
            })),
            "lz4" => Ok(AnyCodec::Lz4(compression::Lz4Codec {
                acceleration: level,
            })),
            "blosc" => Ok(AnyCodec::Blosc(blosc::BloscCodec::new(
                blosc::BloscCname::Zstd,
                level,
            ))),
            other => match other.strip_prefix("blosc-").and_then(blosc::BloscCname::parse) {
                Some(cname) => Ok(AnyCodec::Blosc(blosc::BloscCodec::new(cname, level))),
                None => Err(ZarrError::Codec(format!("Unknown compression: {other}"))),
            },
        }
    }

    /// Get the bytes-codec endian config, if this is a BytesCodec.
    pub fn bytes_endian(&self) -> Option<Endian> {
        match self {
            AnyCodec::Bytes(c) => Some(c.effective_endian()),
            _ => None,
        }
    }

    /// Decode with a bytes-to-bytes codec.
    async fn decode_bytes(&self, data: &[u8]) -> ZarrResult<Vec<u8>> {
        match self {
            AnyCodec::Gzip(c) => c.decode(data),
            AnyCodec::Blosc(c) => c.decode(data).await,
            AnyCodec::Zlib(c) => c.decode(data),
            AnyCodec::Zstd(c) => c.decode(data),
            AnyCodec::Lz4(c) => c.decode(data),
            AnyCodec::Crc32c(c) => c.decode(data),
            AnyCodec::Bytes(_) | AnyCodec::Sharding(_) => Err(ZarrError::Codec(format!(
                "{} is not a bytes-to-bytes codec",
                self.codec_id()
            ))),
        }
    }

    /// Encode with a bytes-to-bytes codec.
    async fn encode_bytes(&self, data: &[u8]) -> ZarrResult<Vec<u8>> {
        match self {
            AnyCodec::Gzip(c) => c.encode(data),
            AnyCodec::Blosc(c) => c.encode(data).await,
            AnyCodec::Zlib(c) => c.encode(data),
            AnyCodec::Zstd(c) => c.encode(data),
            AnyCodec::Lz4(c) => c.encode(data),
            AnyCodec::Crc32c(c) => Ok(c.encode(data)),
            AnyCodec::Bytes(_) | AnyCodec::Sharding(_) => Err(ZarrError::Codec(format!(
                "{} is not a bytes-to-bytes codec",
                self.codec_id()
            ))),
        }
    }

    /// The V3 `{ "name": ..., "configuration": ... }` form of this codec.
    pub fn to_metadata(&self) -> ZarrResult<serde_json::Value> {
        let configuration = match self {
            AnyCodec::Bytes(c) => Some(serde_json::to_value(c)?),
            AnyCodec::Gzip(c) => Some(serde_json::to_value(c)?),
            AnyCodec::Blosc(c) => Some(serde_json::to_value(c)?),
            AnyCodec::Zlib(c) => Some(serde_json::to_value(c)?),
            AnyCodec::Zstd(c) => Some(serde_json::to_value(c)?),
            AnyCodec::Lz4(c) => Some(serde_json::to_value(c)?),
            AnyCodec::Crc32c(_) => None,
            AnyCodec::Sharding(c) => Some(serde_json::to_value(c)?),
        };
        Ok(serde_json::to_value(CodecEnvelope {
            name: self.codec_id().to_string(),
            configuration,
        })?)
    }
}

impl std::fmt::Display for AnyCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.compression() {
            Some(c) => write!(f, "{c}"),
            None => write!(f, "{}", self.codec_id()),
        }
    }
}

/// Render a pipeline as `bytes -> zstd(5)`, nesting shard-inner codecs.
pub fn describe_pipeline(codecs: &[AnyCodec]) -> String {
    codecs
        .iter()
        .map(|c| match c {
            AnyCodec::Sharding(s) => format!("sharding[{}]", describe_pipeline(&s.codecs)),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" -> ")
}

// ---------------------------------------------------------------------------
// Chunk representation
// ---------------------------------------------------------------------------

/// Decoded shape, element type and fill element of one chunk or shard.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRepresentation {
    pub shape: Vec<usize>,
    pub data_type: DataType,
    /// Fill value as element bytes, in the chunk's byte order.
    pub fill_value: Vec<u8>,
}

impl ChunkRepresentation {
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn num_bytes(&self) -> usize {
        self.num_elements() * self.data_type.byte_size()
    }
}

// ---------------------------------------------------------------------------
// Codec pipeline
// ---------------------------------------------------------------------------

/// Check that a pipeline has exactly one array-to-bytes codec, in first
/// position.
pub fn validate_pipeline(codecs: &[AnyCodec]) -> ZarrResult<()> {
    match codecs.first() {
        Some(first) if first.is_array_to_bytes() => {}
        _ => {
            return Err(ZarrError::Codec(
                "Codec pipeline must start with an array-to-bytes codec".into(),
            ));
        }
    }
    if codecs[1..].iter().any(AnyCodec::is_array_to_bytes) {
        return Err(ZarrError::Codec(
            "Codec pipeline has more than one array-to-bytes codec".into(),
        ));
    }
    Ok(())
}

type PipelineFuture<'a> = Pin<Box<dyn Future<Output = ZarrResult<Vec<u8>>> + Send + 'a>>;

/// Decode an encoded chunk. Codecs are applied in *reverse* order (last
/// codec decodes first).
pub fn decode_chunk<'a>(
    codecs: &'a [AnyCodec],
    encoded: &'a [u8],
    repr: &'a ChunkRepresentation,
) -> PipelineFuture<'a> {
    Box::pin(async move {
        validate_pipeline(codecs)?;
        let mut buf = encoded.to_vec();
        for codec in codecs.iter().rev() {
            buf = match codec {
                AnyCodec::Bytes(_) => buf,
                AnyCodec::Sharding(c) => c.decode(&buf, repr).await?,
                other => other.decode_bytes(&buf).await?,
            };
        }
        if buf.len() != repr.num_bytes() {
            return Err(ZarrError::Decode(format!(
                "Decoded chunk has {} bytes, expected {}",
                buf.len(),
                repr.num_bytes()
            )));
        }
        Ok(buf)
    })
}

/// Encode a decoded chunk, applying codecs in order.
pub fn encode_chunk<'a>(
    codecs: &'a [AnyCodec],
    decoded: &'a [u8],
    repr: &'a ChunkRepresentation,
) -> PipelineFuture<'a> {
    Box::pin(async move {
        validate_pipeline(codecs)?;
        if decoded.len() != repr.num_bytes() {
            return Err(ZarrError::Encode(format!(
                "Chunk has {} bytes, expected {}",
                decoded.len(),
                repr.num_bytes()
            )));
        }
        let mut buf = decoded.to_vec();
        for codec in codecs {
            buf = match codec {
                AnyCodec::Bytes(_) => buf,
                AnyCodec::Sharding(c) => c.encode(&buf, repr).await?,
                other => other.encode_bytes(&buf).await?,
            };
        }
        Ok(buf)
    })
}

// ---------------------------------------------------------------------------
// JSON-based codec parsing  (V3 style)
// ---------------------------------------------------------------------------

/// JSON envelope of a codec entry in `zarr.json`.
#[derive(Debug, Deserialize, Serialize)]
struct CodecEnvelope {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    configuration: Option<serde_json::Value>,
}

fn configuration<T: serde::de::DeserializeOwned>(
    name: &str,
    config: serde_json::Value,
) -> ZarrResult<T> {
    serde_json::from_value(config)
        .map_err(|e| ZarrError::Codec(format!("Invalid {name} configuration: {e}")))
}

/// Parse a single codec from a JSON value (V3 `{ "name": ..., "configuration": ... }` format).
pub fn parse_codec(value: &serde_json::Value) -> ZarrResult<AnyCodec> {
    let env: CodecEnvelope = serde_json::from_value(value.clone())
        .map_err(|e| ZarrError::Codec(format!("Invalid codec envelope: {e}")))?;

    let config = env
        .configuration
        .unwrap_or(serde_json::Value::Object(Default::default()));
    let name = env.name.as_str();

    match lookup_codec_id(name) {
        Some(CodecId::Bytes) => Ok(AnyCodec::Bytes(configuration(name, config)?)),
        Some(CodecId::Gzip) => Ok(AnyCodec::Gzip(configuration(name, config)?)),
        Some(CodecId::Blosc) => Ok(AnyCodec::Blosc(configuration(name, config)?)),
        Some(CodecId::Zlib) => Ok(AnyCodec::Zlib(configuration(name, config)?)),
        Some(CodecId::Zstd) => Ok(AnyCodec::Zstd(configuration(name, config)?)),
        Some(CodecId::Lz4) => Ok(AnyCodec::Lz4(configuration(name, config)?)),
        Some(CodecId::Crc32c) => Ok(AnyCodec::Crc32c(checksum::Crc32cCodec)),
        Some(CodecId::Sharding) => Ok(AnyCodec::Sharding(configuration(name, config)?)),
        None => Err(ZarrError::Codec(format!("Unknown codec: {name}"))),
    }
}

/// Parse a list of codecs from JSON values.
pub fn parse_codecs(values: &[serde_json::Value]) -> ZarrResult<Vec<AnyCodec>> {
    values.iter().map(parse_codec).collect()
}

impl Serialize for AnyCodec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_metadata()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AnyCodec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        parse_codec(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repr(shape: &[usize]) -> ChunkRepresentation {
        ChunkRepresentation {
            shape: shape.to_vec(),
            data_type: DataType::UInt16,
            fill_value: vec![0, 0],
        }
    }

    #[test]
    fn compression_names_round_trip() {
        for (name, level) in [("zstd", 3), ("gzip", 6), ("blosc-zstd", 5), ("blosc-lz4", 1)] {
            let codec = AnyCodec::from_compression(&Compression::new(name, level)).unwrap();
            assert_eq!(codec.compression(), Some(Compression::new(name, level)));
        }
        assert!(AnyCodec::from_compression(&Compression::new("brotli", 1)).is_err());
        assert!(AnyCodec::from_compression(&Compression::new("gzip", -1)).is_err());
    }

    #[test]
    fn blosc_metadata_uses_v3_configuration() {
        let codec = AnyCodec::from_compression(&Compression::new("blosc-zstd", 5)).unwrap();
        let md = codec.to_metadata().unwrap();
        assert_eq!(md["name"], "blosc");
        assert_eq!(md["configuration"]["cname"], "zstd");
        assert_eq!(md["configuration"]["clevel"], 5);
    }

    #[test]
    fn unknown_or_malformed_codecs_are_errors() {
        assert!(parse_codec(&json!({"name": "transpose", "configuration": {"order": [1, 0]}})).is_err());
        assert!(parse_codec(&json!({"name": "gzip", "configuration": {"level": "high"}})).is_err());
        assert!(matches!(
            parse_codec(&json!({"name": "numcodecs.zlib"})).unwrap(),
            AnyCodec::Zlib(_)
        ));
    }

    #[test]
    fn pipeline_must_start_with_array_to_bytes() {
        let zstd = AnyCodec::Zstd(compression::ZstdCodec::default());
        let bytes = AnyCodec::Bytes(bytes::BytesCodec::default());
        assert!(validate_pipeline(&[zstd.clone(), bytes.clone()]).is_err());
        assert!(validate_pipeline(&[bytes.clone(), bytes.clone()]).is_err());
        assert!(validate_pipeline(&[bytes, zstd]).is_ok());
    }

    #[tokio::test]
    async fn flat_pipeline_round_trips() {
        let codecs = vec![
            AnyCodec::Bytes(bytes::BytesCodec::default()),
            AnyCodec::Zstd(compression::ZstdCodec::default()),
            AnyCodec::Crc32c(checksum::Crc32cCodec),
        ];
        let repr = repr(&[4, 4]);
        let data: Vec<u8> = (0..32u8).collect();
        let encoded = encode_chunk(&codecs, &data, &repr).await.unwrap();
        assert_eq!(decode_chunk(&codecs, &encoded, &repr).await.unwrap(), data);
        assert!(encode_chunk(&codecs, &data[..30], &repr).await.is_err());
    }

    #[test]
    fn describe_pipeline_nests_shard_codecs() {
        let md = json!([{
            "name": "sharding_indexed",
            "configuration": {
                "chunk_shape": [2, 2],
                "codecs": [{"name": "bytes", "configuration": {"endian": "little"}},
                           {"name": "zstd", "configuration": {"level": 0, "checksum": false}}]
            }
        }]);
        let codecs: Vec<AnyCodec> = serde_json::from_value(md).unwrap();
        assert_eq!(describe_pipeline(&codecs), "sharding[bytes -> zstd(0)]");
    }
}
