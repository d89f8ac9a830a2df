use crate::error::{ZarrError, ZarrResult};
use crate::types::DataType;
use serde::{Deserialize, Serialize};
use std::ffi::CStr;

// ---------------------------------------------------------------------------
// Blosc sub-compressor and shuffle types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BloscCname {
    Lz4,
    Lz4hc,
    Blosclz,
    Zstd,
    Snappy,
    Zlib,
}

impl BloscCname {
    pub fn as_str(&self) -> &'static str {
        match self {
            BloscCname::Lz4 => "lz4",
            BloscCname::Lz4hc => "lz4hc",
            BloscCname::Blosclz => "blosclz",
            BloscCname::Zstd => "zstd",
            BloscCname::Snappy => "snappy",
            BloscCname::Zlib => "zlib",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "lz4" => Some(BloscCname::Lz4),
            "lz4hc" => Some(BloscCname::Lz4hc),
            "blosclz" => Some(BloscCname::Blosclz),
            "zstd" => Some(BloscCname::Zstd),
            "snappy" => Some(BloscCname::Snappy),
            "zlib" => Some(BloscCname::Zlib),
            _ => None,
        }
    }

    fn as_cstr(&self) -> &'static CStr {
        match self {
            BloscCname::Lz4 => c"lz4",
            BloscCname::Lz4hc => c"lz4hc",
            BloscCname::Blosclz => c"blosclz",
            BloscCname::Zstd => c"zstd",
            BloscCname::Snappy => c"snappy",
            BloscCname::Zlib => c"zlib",
        }
    }
}

impl std::fmt::Display for BloscCname {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloscShuffle {
    NoShuffle,
    Shuffle,
    BitShuffle,
}

impl BloscShuffle {
    fn as_raw(&self) -> i32 {
        match self {
            BloscShuffle::NoShuffle => blosc_src::BLOSC_NOSHUFFLE as i32,
            BloscShuffle::Shuffle => blosc_src::BLOSC_SHUFFLE as i32,
            BloscShuffle::BitShuffle => blosc_src::BLOSC_BITSHUFFLE as i32,
        }
    }
}

impl Serialize for BloscShuffle {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BloscShuffle::NoShuffle => serializer.serialize_str("noshuffle"),
            BloscShuffle::Shuffle => serializer.serialize_str("shuffle"),
            BloscShuffle::BitShuffle => serializer.serialize_str("bitshuffle"),
        }
    }
}

impl<'de> Deserialize<'de> for BloscShuffle {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = serde_json::Value::deserialize(deserializer)?;
        match &v {
            serde_json::Value::String(s) => match s.to_lowercase().as_str() {
                "noshuffle" | "0" => Ok(BloscShuffle::NoShuffle),
                "shuffle" | "1" => Ok(BloscShuffle::Shuffle),
                "bitshuffle" | "2" => Ok(BloscShuffle::BitShuffle),
                other => Err(serde::de::Error::custom(format!(
                    "Unknown blosc shuffle: {other}"
                ))),
            },
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(BloscShuffle::NoShuffle),
                Some(1) => Ok(BloscShuffle::Shuffle),
                Some(2) => Ok(BloscShuffle::BitShuffle),
                _ => Err(serde::de::Error::custom(format!(
                    "Unknown blosc shuffle int: {n}"
                ))),
            },
            _ => Err(serde::de::Error::custom(
                "Expected string or int for blosc shuffle",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// BloscCodec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloscCodec {
    #[serde(default = "default_cname")]
    pub cname: BloscCname,
    #[serde(default = "default_clevel")]
    pub clevel: i32,
    #[serde(default = "default_shuffle")]
    pub shuffle: BloscShuffle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typesize: Option<usize>,
    #[serde(default)]
    pub blocksize: usize,
}

fn default_cname() -> BloscCname {
    BloscCname::Zstd
}

fn default_clevel() -> i32 {
    5
}

fn default_shuffle() -> BloscShuffle {
    BloscShuffle::NoShuffle
}

impl Default for BloscCodec {
    fn default() -> Self {
        Self {
            cname: BloscCname::Zstd,
            clevel: 5,
            shuffle: BloscShuffle::NoShuffle,
            typesize: None,
            blocksize: 0,
        }
    }
}

impl BloscCodec {
    pub fn new(cname: BloscCname, clevel: i32) -> Self {
        Self {
            cname,
            clevel: clevel.clamp(0, 9),
            ..Self::default()
        }
    }

    /// Fill in the element size of `dtype`, enabling byte shuffling for
    /// multi-byte elements.
    pub fn for_data_type(mut self, dtype: DataType) -> Self {
        let typesize = dtype.byte_size();
        self.typesize = Some(typesize);
        if typesize > 1 && self.shuffle == BloscShuffle::NoShuffle {
            self.shuffle = BloscShuffle::Shuffle;
        }
        self
    }

    /// Decompress blosc-compressed data.
    /// Runs on a blocking thread since decompression can be CPU-intensive.
    pub async fn decode(&self, data: &[u8]) -> ZarrResult<Vec<u8>> {
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || blosc_decompress(&data))
            .await
            .map_err(|e| ZarrError::Decode(format!("Blosc task join error: {e}")))?
    }

    /// Compress data using blosc.
    pub async fn encode(&self, data: &[u8]) -> ZarrResult<Vec<u8>> {
        let data = data.to_vec();
        let codec = self.clone();
        tokio::task::spawn_blocking(move || blosc_compress(&data, &codec))
            .await
            .map_err(|e| ZarrError::Encode(format!("Blosc task join error: {e}")))?
    }
}

// ---------------------------------------------------------------------------
// Blosc FFI wrappers
// ---------------------------------------------------------------------------

/// Validate a blosc compressed buffer and return the uncompressed size.
fn blosc_validate(data: &[u8]) -> Option<usize> {
    let mut nbytes: usize = 0;
    // SAFETY: `data` is a valid slice and `nbytes` a valid out-pointer.
    let result =
        unsafe { blosc_src::blosc_cbuffer_validate(data.as_ptr().cast(), data.len(), &mut nbytes) };
    if result == 0 { Some(nbytes) } else { None }
}

/// Decompress a blosc buffer with the context API, which needs no global
/// `blosc_init()`.
fn blosc_decompress(data: &[u8]) -> ZarrResult<Vec<u8>> {
    let nbytes = blosc_validate(data)
        .ok_or_else(|| ZarrError::Decode("Blosc encoded value is invalid".into()))?;
    if nbytes == 0 {
        return Ok(Vec::new());
    }

    let mut output = vec![0u8; nbytes];
    // SAFETY: `output` has exactly the validated uncompressed length.
    let result = unsafe {
        blosc_src::blosc_decompress_ctx(
            data.as_ptr().cast(),
            output.as_mut_ptr().cast(),
            output.len(),
            1,
        )
    };
    if result < 0 {
        return Err(ZarrError::Decode(format!(
            "Blosc decompress returned error code: {result}"
        )));
    }
    Ok(output)
}

fn blosc_compress(data: &[u8], codec: &BloscCodec) -> ZarrResult<Vec<u8>> {
    let typesize = codec.typesize.unwrap_or(1);
    let destsize = data.len() + blosc_src::BLOSC_MAX_OVERHEAD as usize;
    let mut compressed = vec![0u8; destsize];

    // SAFETY: `compressed` is sized for the worst case blosc output.
    let cbytes = unsafe {
        blosc_src::blosc_compress_ctx(
            codec.clevel,
            codec.shuffle.as_raw(),
            typesize,
            data.len(),
            data.as_ptr().cast(),
            compressed.as_mut_ptr().cast(),
            destsize,
            codec.cname.as_cstr().as_ptr(),
            codec.blocksize,
            1,
        )
    };
    if cbytes < 0 {
        return Err(ZarrError::Encode(format!(
            "Blosc compress returned error code: {cbytes}"
        )));
    }
    compressed.truncate(cbytes as usize);
    Ok(compressed)
}
