use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::bytes::BytesCodec;
use super::checksum::Crc32cCodec;
use super::{AnyCodec, ChunkRepresentation, decode_chunk, encode_chunk};
use crate::array::{cartesian_indices, copy_region};
use crate::error::{ZarrError, ZarrResult};
use crate::types::{DataType, Endian, fill_bytes};

/// Index entry (offset and length) marking an inner chunk that was not
/// written because it only held the fill value.
const EMPTY_CHUNK: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardingIndexLocation {
    Start,
    #[default]
    End,
}

/// `sharding_indexed` codec: a shard is split into inner chunks, each
/// encoded with `codecs`, concatenated and followed (or preceded) by an
/// index of `(offset, nbytes)` pairs encoded with `index_codecs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardingCodec {
    pub chunk_shape: Vec<usize>,
    pub codecs: Vec<AnyCodec>,
    #[serde(default = "default_index_codecs")]
    pub index_codecs: Vec<AnyCodec>,
    #[serde(default)]
    pub index_location: ShardingIndexLocation,
}

fn default_index_codecs() -> Vec<AnyCodec> {
    vec![
        AnyCodec::Bytes(BytesCodec::new(Endian::Little)),
        AnyCodec::Crc32c(Crc32cCodec),
    ]
}

impl ShardingCodec {
    pub fn new(chunk_shape: Vec<usize>, codecs: Vec<AnyCodec>) -> Self {
        Self {
            chunk_shape,
            codecs,
            index_codecs: default_index_codecs(),
            index_location: ShardingIndexLocation::End,
        }
    }

    fn chunks_per_shard(&self, shard_shape: &[usize]) -> ZarrResult<Vec<usize>> {
        if shard_shape.len() != self.chunk_shape.len() {
            return Err(ZarrError::Codec(format!(
                "Shard rank {} does not match inner chunk rank {}",
                shard_shape.len(),
                self.chunk_shape.len()
            )));
        }
        shard_shape
            .iter()
            .zip(&self.chunk_shape)
            .map(|(&shard, &chunk)| {
                if chunk == 0 || shard % chunk != 0 {
                    Err(ZarrError::Codec(format!(
                        "Shard shape {shard_shape:?} is not a multiple of inner chunk shape {:?}",
                        self.chunk_shape
                    )))
                } else {
                    Ok(shard / chunk)
                }
            })
            .collect()
    }

    fn inner_representation(&self, shard: &ChunkRepresentation) -> ChunkRepresentation {
        ChunkRepresentation {
            shape: self.chunk_shape.clone(),
            data_type: shard.data_type,
            fill_value: shard.fill_value.clone(),
        }
    }

    fn index_representation(chunks_per_shard: &[usize]) -> ChunkRepresentation {
        let mut shape = chunks_per_shard.to_vec();
        shape.push(2);
        ChunkRepresentation {
            shape,
            data_type: DataType::UInt64,
            fill_value: EMPTY_CHUNK.to_le_bytes().to_vec(),
        }
    }

    fn index_endian(&self) -> Endian {
        self.index_codecs
            .iter()
            .find_map(AnyCodec::bytes_endian)
            .unwrap_or(Endian::Little)
    }

    /// Encoded index size; only fixed-size index codecs are supported.
    fn index_encoded_size(&self, n_chunks: usize) -> ZarrResult<usize> {
        let mut size = n_chunks * 2 * std::mem::size_of::<u64>();
        for codec in &self.index_codecs {
            match codec {
                AnyCodec::Bytes(_) => {}
                AnyCodec::Crc32c(c) => size = c.encoded_size(size),
                other => {
                    return Err(ZarrError::Codec(format!(
                        "Unsupported shard index codec: {}",
                        other.codec_id()
                    )));
                }
            }
        }
        Ok(size)
    }

    /// Split a decoded shard into inner chunks and encode them.
    pub async fn encode(&self, shard: &[u8], repr: &ChunkRepresentation) -> ZarrResult<Vec<u8>> {
        let chunks_per_shard = self.chunks_per_shard(&repr.shape)?;
        let inner_repr = self.inner_representation(repr);
        let elem_size = repr.data_type.byte_size();
        let n_chunks: usize = chunks_per_shard.iter().product();
        let index_size = self.index_encoded_size(n_chunks)?;
        let data_offset = match self.index_location {
            ShardingIndexLocation::Start => index_size,
            ShardingIndexLocation::End => 0,
        };

        let zero_origin = vec![0; repr.shape.len()];
        let mut index = vec![EMPTY_CHUNK; n_chunks * 2];
        let mut body = Vec::new();
        let mut chunk = vec![0u8; inner_repr.num_bytes()];

        for (i, chunk_indices) in cartesian_indices(&chunks_per_shard).iter().enumerate() {
            let origin: Vec<usize> = chunk_indices
                .iter()
                .zip(&self.chunk_shape)
                .map(|(c, s)| c * s)
                .collect();
            copy_region(
                shard,
                &repr.shape,
                &origin,
                &mut chunk,
                &self.chunk_shape,
                &zero_origin,
                &self.chunk_shape,
                elem_size,
            );
            if chunk
                .chunks_exact(elem_size)
                .all(|element| element == repr.fill_value.as_slice())
            {
                continue;
            }
            let encoded = encode_chunk(&self.codecs, &chunk, &inner_repr).await?;
            index[2 * i] = (data_offset + body.len()) as u64;
            index[2 * i + 1] = encoded.len() as u64;
            body.extend_from_slice(&encoded);
        }

        let mut raw_index = vec![0u8; index.len() * 8];
        match self.index_endian() {
            Endian::Big => BigEndian::write_u64_into(&index, &mut raw_index),
            Endian::Little | Endian::NotApplicable => {
                LittleEndian::write_u64_into(&index, &mut raw_index)
            }
        }
        let index_repr = Self::index_representation(&chunks_per_shard);
        let encoded_index = encode_chunk(&self.index_codecs, &raw_index, &index_repr).await?;

        let mut out = Vec::with_capacity(body.len() + encoded_index.len());
        match self.index_location {
            ShardingIndexLocation::Start => {
                out.extend_from_slice(&encoded_index);
                out.extend_from_slice(&body);
            }
            ShardingIndexLocation::End => {
                out.extend_from_slice(&body);
                out.extend_from_slice(&encoded_index);
            }
        }
        Ok(out)
    }

    /// Decode an encoded shard into its full decoded bytes. Inner chunks
    /// absent from the index are filled with the fill value.
    pub async fn decode(&self, encoded: &[u8], repr: &ChunkRepresentation) -> ZarrResult<Vec<u8>> {
        let chunks_per_shard = self.chunks_per_shard(&repr.shape)?;
        let inner_repr = self.inner_representation(repr);
        let elem_size = repr.data_type.byte_size();
        let n_chunks: usize = chunks_per_shard.iter().product();
        let index_size = self.index_encoded_size(n_chunks)?;

        if encoded.len() < index_size {
            return Err(ZarrError::Decode(
                "The encoded shard is smaller than the expected size of its index".into(),
            ));
        }
        let encoded_index = match self.index_location {
            ShardingIndexLocation::Start => &encoded[..index_size],
            ShardingIndexLocation::End => &encoded[encoded.len() - index_size..],
        };
        let index_repr = Self::index_representation(&chunks_per_shard);
        let raw_index = decode_chunk(&self.index_codecs, encoded_index, &index_repr).await?;
        let mut index = vec![0u64; n_chunks * 2];
        match self.index_endian() {
            Endian::Big => BigEndian::read_u64_into(&raw_index, &mut index),
            Endian::Little | Endian::NotApplicable => {
                LittleEndian::read_u64_into(&raw_index, &mut index)
            }
        }

        let zero_origin = vec![0; repr.shape.len()];
        let mut shard = fill_bytes(&repr.fill_value, repr.num_elements());

        for (i, chunk_indices) in cartesian_indices(&chunks_per_shard).iter().enumerate() {
            let (offset, nbytes) = (index[2 * i], index[2 * i + 1]);
            if offset == EMPTY_CHUNK && nbytes == EMPTY_CHUNK {
                continue;
            }
            let start = usize::try_from(offset)
                .map_err(|_| ZarrError::Decode(format!("Shard offset {offset} out of range")))?;
            let end = usize::try_from(nbytes)
                .ok()
                .and_then(|n| start.checked_add(n))
                .filter(|&end| end <= encoded.len())
                .ok_or_else(|| {
                    ZarrError::Decode(format!(
                        "Inner chunk {i} ({offset}+{nbytes}) exceeds shard of {} bytes",
                        encoded.len()
                    ))
                })?;
            let decoded = decode_chunk(&self.codecs, &encoded[start..end], &inner_repr).await?;
            let origin: Vec<usize> = chunk_indices
                .iter()
                .zip(&self.chunk_shape)
                .map(|(c, s)| c * s)
                .collect();
            copy_region(
                &decoded,
                &self.chunk_shape,
                &zero_origin,
                &mut shard,
                &repr.shape,
                &origin,
                &self.chunk_shape,
                elem_size,
            );
        }
        Ok(shard)
    }
}
