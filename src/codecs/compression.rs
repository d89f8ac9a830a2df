//! Byte-to-byte compression codecs backed by `flate2`, `zstd` and `lz4_flex`.

use crate::error::{ZarrError, ZarrResult};
use flate2::Compression as FlateLevel;
use flate2::read::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

// ---------------------------------------------------------------------------
// Compression identity
// ---------------------------------------------------------------------------

/// Name and level of a compression step, independent of its configuration
/// details. Blosc is named after its sub-compressor, e.g. `blosc-zstd`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Compression {
    pub name: String,
    pub level: i32,
}

impl Compression {
    pub fn new(name: impl Into<String>, level: i32) -> Self {
        Self {
            name: name.into(),
            level,
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.level)
    }
}

// ---------------------------------------------------------------------------
// gzip / zlib
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GzipCodec {
    #[serde(default = "default_gzip_level")]
    pub level: u32,
}

fn default_gzip_level() -> u32 {
    5
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self { level: 5 }
    }
}

impl GzipCodec {
    pub fn decode(&self, data: &[u8]) -> ZarrResult<Vec<u8>> {
        let mut out = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| ZarrError::Decode(format!("Gzip decompress failed: {e}")))?;
        Ok(out)
    }

    pub fn encode(&self, data: &[u8]) -> ZarrResult<Vec<u8>> {
        let mut out = Vec::new();
        GzEncoder::new(data, FlateLevel::new(self.level.min(9)))
            .read_to_end(&mut out)
            .map_err(|e| ZarrError::Encode(format!("Gzip compress failed: {e}")))?;
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZlibCodec {
    #[serde(default = "default_zlib_level")]
    pub level: u32,
}

fn default_zlib_level() -> u32 {
    1
}

impl Default for ZlibCodec {
    fn default() -> Self {
        Self { level: 1 }
    }
}

impl ZlibCodec {
    pub fn decode(&self, data: &[u8]) -> ZarrResult<Vec<u8>> {
        let mut out = Vec::new();
        ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| ZarrError::Decode(format!("Zlib decompress failed: {e}")))?;
        Ok(out)
    }

    pub fn encode(&self, data: &[u8]) -> ZarrResult<Vec<u8>> {
        let mut out = Vec::new();
        ZlibEncoder::new(data, FlateLevel::new(self.level.min(9)))
            .read_to_end(&mut out)
            .map_err(|e| ZarrError::Encode(format!("Zlib compress failed: {e}")))?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// zstd
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZstdCodec {
    #[serde(default = "default_zstd_level")]
    pub level: i32,
    #[serde(default)]
    pub checksum: bool,
}

fn default_zstd_level() -> i32 {
    5
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self {
            level: 5,
            checksum: false,
        }
    }
}

impl ZstdCodec {
    pub fn decode(&self, data: &[u8]) -> ZarrResult<Vec<u8>> {
        zstd::stream::decode_all(data)
            .map_err(|e| ZarrError::Decode(format!("Zstd decompress failed: {e}")))
    }

    pub fn encode(&self, data: &[u8]) -> ZarrResult<Vec<u8>> {
        let encode = || -> std::io::Result<Vec<u8>> {
            let mut encoder = zstd::stream::Encoder::new(Vec::new(), self.level)?;
            encoder.include_checksum(self.checksum)?;
            encoder.write_all(data)?;
            encoder.finish()
        };
        encode().map_err(|e| ZarrError::Encode(format!("Zstd compress failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// lz4 (numcodecs framing)
// ---------------------------------------------------------------------------

const LZ4_SIZE_PREFIX_BYTES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lz4Codec {
    #[serde(default = "default_acceleration")]
    pub acceleration: i32,
}

fn default_acceleration() -> i32 {
    1
}

impl Default for Lz4Codec {
    fn default() -> Self {
        Self { acceleration: 1 }
    }
}

impl Lz4Codec {
    /// Decode an LZ4 block carrying a 4-byte little-endian size prefix.
    pub fn decode(&self, data: &[u8]) -> ZarrResult<Vec<u8>> {
        if data.len() < LZ4_SIZE_PREFIX_BYTES {
            return Err(ZarrError::Decode(
                "LZ4 decode: compressed buffer missing 4-byte size prefix".into(),
            ));
        }
        let (prefix, payload) = data.split_at(LZ4_SIZE_PREFIX_BYTES);
        let mut size = [0u8; LZ4_SIZE_PREFIX_BYTES];
        size.copy_from_slice(prefix);
        let dest_size = u32::from_le_bytes(size) as usize;

        let decompressed = lz4_flex::block::decompress(payload, dest_size)
            .map_err(|e| ZarrError::Decode(format!("LZ4 decompress failed: {e}")))?;
        if decompressed.len() != dest_size {
            return Err(ZarrError::Decode(format!(
                "LZ4 decompression error: expected {dest_size} bytes, got {}",
                decompressed.len()
            )));
        }
        Ok(decompressed)
    }

    /// Encode an LZ4 block, prepending a 4-byte little-endian size prefix.
    pub fn encode(&self, data: &[u8]) -> ZarrResult<Vec<u8>> {
        let orig_size = u32::try_from(data.len())
            .map_err(|_| ZarrError::Encode("LZ4 input exceeds 4 GiB".into()))?;
        let compressed = lz4_flex::block::compress(data);
        let mut out = Vec::with_capacity(LZ4_SIZE_PREFIX_BYTES + compressed.len());
        out.extend_from_slice(&orig_size.to_le_bytes());
        out.extend_from_slice(&compressed);
        Ok(out)
    }
}
