//! Producer write path: create an array with planned geometry and write it.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::array::ZarrArray;
use crate::codecs::bytes::BytesCodec;
use crate::codecs::sharding::ShardingCodec;
use crate::codecs::{AnyCodec, Compression};
use crate::error::ZarrResult;
use crate::layout::{ChunkLayout, LayoutRole, ShardMultipliers, plan_layout};
use crate::metadata::ArrayMetadata;
use crate::store::StorageBackend;
use crate::types::{DataType, Endian, FillValue, default_fill_value};

/// Build the codec pipeline for `compression`.
///
/// With `inner_chunk_shape` the pipeline is a single sharding codec whose
/// inner chunks are encoded as `bytes -> compression`; without it the
/// pipeline is flat.
pub fn codec_pipeline(
    data_type: DataType,
    endian: Endian,
    compression: &Compression,
    inner_chunk_shape: Option<Vec<usize>>,
) -> ZarrResult<Vec<AnyCodec>> {
    let bytes = if data_type.byte_size() == 1 {
        BytesCodec::for_data_type(data_type)
    } else {
        BytesCodec::new(endian)
    };
    let compressor = match AnyCodec::from_compression(compression)? {
        AnyCodec::Blosc(blosc) => AnyCodec::Blosc(blosc.for_data_type(data_type)),
        other => other,
    };
    let codecs = vec![AnyCodec::Bytes(bytes), compressor];
    Ok(match inner_chunk_shape {
        Some(chunk_shape) => vec![AnyCodec::Sharding(ShardingCodec::new(chunk_shape, codecs))],
        None => codecs,
    })
}

/// Description of a variable handed over by a producer.
#[derive(Debug, Clone)]
pub struct VariableSpec {
    pub shape: Vec<usize>,
    pub data_type: DataType,
    /// Chunking the producer would like, before sharding is planned.
    pub chunk_candidate: Option<Vec<usize>>,
    pub fill_value: Option<FillValue>,
    pub attributes: Map<String, Value>,
    pub dimension_names: Option<Vec<Option<String>>>,
}

impl VariableSpec {
    pub fn new(shape: Vec<usize>, data_type: DataType) -> Self {
        Self {
            shape,
            data_type,
            chunk_candidate: None,
            fill_value: None,
            attributes: Map::new(),
            dimension_names: None,
        }
    }

    pub fn with_chunks(mut self, chunks: Vec<usize>) -> Self {
        self.chunk_candidate = Some(chunks);
        self
    }

    pub fn with_fill_value(mut self, fill_value: FillValue) -> Self {
        self.fill_value = Some(fill_value);
        self
    }

    pub fn with_dimension_names<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.dimension_names = Some(names.into_iter().map(|n| Some(n.into())).collect());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Metadata for `spec` laid out according to `layout`.
pub fn array_metadata(
    spec: &VariableSpec,
    layout: &ChunkLayout,
    compression: &Compression,
) -> ZarrResult<ArrayMetadata> {
    let inner = layout.shard_shape.as_ref().map(|_| layout.chunk_shape.clone());
    let codecs = codec_pipeline(spec.data_type, Endian::Little, compression, inner)?;
    let mut metadata = ArrayMetadata::new(
        spec.shape.clone(),
        spec.data_type,
        layout.outer_shape().to_vec(),
        spec.fill_value
            .clone()
            .unwrap_or_else(|| default_fill_value(spec.data_type)),
        codecs,
    );
    metadata.attributes = spec.attributes.clone();
    metadata.dimension_names = spec.dimension_names.clone();
    Ok(metadata)
}

/// Plan geometry for `spec`, create the array at `path` and write `data`
/// (C-order, little-endian element bytes) in one full-extent write.
pub async fn write_variable<S: StorageBackend>(
    store: Arc<S>,
    path: &str,
    spec: &VariableSpec,
    role: LayoutRole,
    compression: &Compression,
    multipliers: &ShardMultipliers,
    data: &[u8],
) -> ZarrResult<ZarrArray<S>> {
    let layout = plan_layout(
        &spec.shape,
        spec.chunk_candidate.as_deref(),
        role,
        multipliers,
    );
    log::debug!(
        "{path}: chunks {:?}, shards {:?}",
        layout.chunk_shape,
        layout.shard_shape
    );
    let metadata = array_metadata(spec, &layout, compression)?;
    let array = ZarrArray::create(store, path, metadata).await?;
    array.write_all(data).await?;
    Ok(array)
}
