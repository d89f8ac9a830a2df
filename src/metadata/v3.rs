//! Zarr V3 `zarr.json` documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{fill_value_to_json, parse_fill_value};
use crate::codecs::sharding::ShardingCodec;
use crate::codecs::{AnyCodec, ChunkRepresentation, validate_pipeline};
use crate::error::{ZarrError, ZarrResult};
use crate::types::{DataType, Endian, FillValue};

pub const METADATA_KEY: &str = "zarr.json";

fn default_zarr_format() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Chunk grid / key encoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "configuration", rename_all = "lowercase")]
pub enum ChunkGrid {
    Regular { chunk_shape: Vec<usize> },
}

impl ChunkGrid {
    pub fn regular(chunk_shape: Vec<usize>) -> Self {
        ChunkGrid::Regular { chunk_shape }
    }

    pub fn chunk_shape(&self) -> &[usize] {
        match self {
            ChunkGrid::Regular { chunk_shape } => chunk_shape,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "configuration", rename_all = "lowercase")]
pub enum ChunkKeyEncoding {
    Default {
        #[serde(default = "slash")]
        separator: String,
    },
    V2 {
        #[serde(default = "dot")]
        separator: String,
    },
}

fn slash() -> String {
    "/".into()
}

fn dot() -> String {
    ".".into()
}

impl Default for ChunkKeyEncoding {
    fn default() -> Self {
        ChunkKeyEncoding::Default { separator: slash() }
    }
}

impl ChunkKeyEncoding {
    /// Key of the chunk at grid position `indices`, relative to the array.
    pub fn encode(&self, indices: &[usize]) -> String {
        let join = |sep: &str| {
            indices
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(sep)
        };
        match self {
            ChunkKeyEncoding::Default { .. } if indices.is_empty() => "c".to_string(),
            ChunkKeyEncoding::Default { separator } => format!("c{separator}{}", join(separator)),
            ChunkKeyEncoding::V2 { .. } if indices.is_empty() => "0".to_string(),
            ChunkKeyEncoding::V2 { separator } => join(separator),
        }
    }
}

// ---------------------------------------------------------------------------
// ArrayMetadata
// ---------------------------------------------------------------------------

/// Parsed `zarr.json` of an array node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawArrayMetadata", into = "RawArrayMetadata")]
pub struct ArrayMetadata {
    pub shape: Vec<usize>,
    pub data_type: DataType,
    /// `None` when the document has no chunk grid.
    pub chunk_grid: Option<ChunkGrid>,
    pub chunk_key_encoding: ChunkKeyEncoding,
    pub fill_value: FillValue,
    pub codecs: Vec<AnyCodec>,
    pub attributes: Map<String, Value>,
    pub dimension_names: Option<Vec<Option<String>>>,
}

/// Wire form of [`ArrayMetadata`]; the fill value can only be interpreted
/// once the data type is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawArrayMetadata {
    #[serde(default = "default_zarr_format")]
    zarr_format: u32,
    shape: Vec<usize>,
    data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunk_grid: Option<ChunkGrid>,
    #[serde(default)]
    chunk_key_encoding: ChunkKeyEncoding,
    #[serde(default)]
    fill_value: Value,
    codecs: Vec<AnyCodec>,
    #[serde(default)]
    attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dimension_names: Option<Vec<Option<String>>>,
}

impl TryFrom<RawArrayMetadata> for ArrayMetadata {
    type Error = String;

    fn try_from(raw: RawArrayMetadata) -> Result<Self, Self::Error> {
        if raw.zarr_format != 3 {
            return Err(format!("Unsupported zarr_format {}", raw.zarr_format));
        }
        let fill_value = parse_fill_value(raw.data_type, &raw.fill_value)?;
        Ok(Self {
            shape: raw.shape,
            data_type: raw.data_type,
            chunk_grid: raw.chunk_grid,
            chunk_key_encoding: raw.chunk_key_encoding,
            fill_value,
            codecs: raw.codecs,
            attributes: raw.attributes,
            dimension_names: raw.dimension_names,
        })
    }
}

impl From<ArrayMetadata> for RawArrayMetadata {
    fn from(md: ArrayMetadata) -> Self {
        Self {
            zarr_format: 3,
            fill_value: fill_value_to_json(&md.fill_value),
            shape: md.shape,
            data_type: md.data_type,
            chunk_grid: md.chunk_grid,
            chunk_key_encoding: md.chunk_key_encoding,
            codecs: md.codecs,
            attributes: md.attributes,
            dimension_names: md.dimension_names,
        }
    }
}

impl ArrayMetadata {
    /// Metadata with a regular grid of `chunk_shape` and default key encoding.
    pub fn new(
        shape: Vec<usize>,
        data_type: DataType,
        chunk_shape: Vec<usize>,
        fill_value: FillValue,
        codecs: Vec<AnyCodec>,
    ) -> Self {
        Self {
            shape,
            data_type,
            chunk_grid: Some(ChunkGrid::regular(chunk_shape)),
            chunk_key_encoding: ChunkKeyEncoding::default(),
            fill_value,
            codecs,
            attributes: Map::new(),
            dimension_names: None,
        }
    }

    /// Shape of one stored object: the shard shape when sharded, the chunk
    /// shape otherwise. Falls back to the array shape when the grid is
    /// missing or does not match the array's rank.
    pub fn outer_chunk_shape(&self) -> Vec<usize> {
        match &self.chunk_grid {
            Some(grid) if grid.chunk_shape().len() == self.shape.len() => {
                grid.chunk_shape().to_vec()
            }
            _ => {
                log::warn!(
                    "array metadata has no usable chunk grid, using the array shape {:?}",
                    self.shape
                );
                self.shape.clone()
            }
        }
    }

    /// The top-level sharding codec, if any.
    pub fn sharding(&self) -> Option<&ShardingCodec> {
        self.codecs.iter().find_map(|c| match c {
            AnyCodec::Sharding(s) => Some(s),
            _ => None,
        })
    }

    /// Byte order of stored elements, from the innermost `bytes` codec.
    pub fn endian(&self) -> Endian {
        let top = self.codecs.iter().find_map(AnyCodec::bytes_endian);
        let inner = self
            .sharding()
            .and_then(|s| s.codecs.iter().find_map(AnyCodec::bytes_endian));
        inner.or(top).unwrap_or(Endian::Little)
    }

    pub fn fill_bytes(&self) -> Vec<u8> {
        self.fill_value.to_bytes(self.data_type, self.endian())
    }

    pub fn representation(&self, shape: Vec<usize>) -> ChunkRepresentation {
        ChunkRepresentation {
            shape,
            data_type: self.data_type,
            fill_value: self.fill_bytes(),
        }
    }

    /// Structural checks done before an array is created.
    pub fn validate(&self) -> ZarrResult<()> {
        let grid = self.chunk_grid.as_ref().ok_or_else(|| {
            ZarrError::Metadata("A new array must have a chunk grid".into())
        })?;
        if grid.chunk_shape().len() != self.shape.len() {
            return Err(ZarrError::Metadata(format!(
                "Chunk shape {:?} does not match the rank of shape {:?}",
                grid.chunk_shape(),
                self.shape
            )));
        }
        if grid.chunk_shape().contains(&0) {
            return Err(ZarrError::Metadata(format!(
                "Chunk shape {:?} has a zero dimension",
                grid.chunk_shape()
            )));
        }
        if let Some(names) = &self.dimension_names {
            if names.len() != self.shape.len() {
                return Err(ZarrError::Metadata(format!(
                    "{} dimension names for an array of rank {}",
                    names.len(),
                    self.shape.len()
                )));
            }
        }
        validate_pipeline(&self.codecs)?;
        if let Some(sharding) = self.sharding() {
            validate_pipeline(&sharding.codecs)?;
            let divisible = grid
                .chunk_shape()
                .iter()
                .zip(&sharding.chunk_shape)
                .all(|(&shard, &chunk)| chunk > 0 && shard % chunk == 0);
            if sharding.chunk_shape.len() != self.shape.len() || !divisible {
                return Err(ZarrError::Metadata(format!(
                    "Shard shape {:?} is not a multiple of inner chunk shape {:?}",
                    grid.chunk_shape(),
                    sharding.chunk_shape
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GroupMetadata
// ---------------------------------------------------------------------------

/// Inline consolidated metadata: every descendant's document keyed by its
/// path relative to the group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedMetadata {
    #[serde(default = "inline")]
    pub kind: String,
    #[serde(default)]
    pub must_understand: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, ConsolidatedEntry>,
}

/// One consolidated document. Arrays using codecs or data types this crate
/// does not model are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConsolidatedEntry {
    Node(NodeMetadata),
    Opaque(Value),
}

fn inline() -> String {
    "inline".into()
}

impl ConsolidatedMetadata {
    pub fn inline(metadata: BTreeMap<String, ConsolidatedEntry>) -> Self {
        Self {
            kind: inline(),
            must_understand: false,
            metadata,
        }
    }
}

/// Parsed `zarr.json` of a group node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    #[serde(default = "default_zarr_format")]
    pub zarr_format: u32,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidated_metadata: Option<ConsolidatedMetadata>,
}

impl GroupMetadata {
    pub fn new(attributes: Map<String, Value>) -> Self {
        Self {
            zarr_format: 3,
            attributes,
            consolidated_metadata: None,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeMetadata
// ---------------------------------------------------------------------------

/// A `zarr.json` document, dispatched on its `node_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "lowercase")]
pub enum NodeMetadata {
    Group(GroupMetadata),
    Array(ArrayMetadata),
}

impl NodeMetadata {
    pub fn from_json(bytes: &[u8]) -> ZarrResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ZarrError::Metadata(e.to_string()))
    }

    pub fn to_json(&self) -> ZarrResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}
