use std::sync::Arc;

use bytes::Bytes;

use crate::codecs::{decode_chunk, encode_chunk};
use crate::error::{ZarrError, ZarrResult};
use crate::metadata::v3::METADATA_KEY;
use crate::metadata::{ArrayMetadata, NodeMetadata};
use crate::store::StorageBackend;
use crate::types::fill_bytes;

// ---------------------------------------------------------------------------
// ZarrArray
// ---------------------------------------------------------------------------

/// One array node of a store: its path, its parsed metadata and the store
/// holding its chunks.
pub struct ZarrArray<S: StorageBackend> {
    store: Arc<S>,
    path: String,
    metadata: ArrayMetadata,
}

impl<S: StorageBackend> Clone for ZarrArray<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            path: self.path.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl<S: StorageBackend> std::fmt::Debug for ZarrArray<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZarrArray")
            .field("path", &self.path)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl<S: StorageBackend> ZarrArray<S> {
    /// Open the array whose `zarr.json` lives at `path`.
    pub async fn open(store: Arc<S>, path: &str) -> ZarrResult<Self> {
        let key = store.join(path, METADATA_KEY);
        let raw = store
            .get(&key)
            .await?
            .ok_or_else(|| ZarrError::NotFound(format!("No array metadata at {key}")))?;
        match NodeMetadata::from_json(&raw)? {
            NodeMetadata::Array(metadata) => Ok(Self {
                store,
                path: path.to_string(),
                metadata,
            }),
            NodeMetadata::Group(_) => Err(ZarrError::Metadata(format!(
                "{path} is a group, not an array"
            ))),
        }
    }

    /// Write `metadata` to `path` and return the (still empty) array.
    ///
    /// Any chunks already stored under `path` are left in place.
    pub async fn create(store: Arc<S>, path: &str, metadata: ArrayMetadata) -> ZarrResult<Self> {
        metadata.validate()?;
        let doc = NodeMetadata::Array(metadata.clone()).to_json()?;
        store
            .set(&store.join(path, METADATA_KEY), Bytes::from(doc))
            .await?;
        Ok(Self {
            store,
            path: path.to_string(),
            metadata,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn metadata(&self) -> &ArrayMetadata {
        &self.metadata
    }

    /// Number of outer chunks along each dimension.
    pub fn grid_shape(&self) -> Vec<usize> {
        let outer = self.metadata.outer_chunk_shape();
        self.metadata
            .shape
            .iter()
            .zip(&outer)
            .map(|(&dim, &chunk)| dim.div_ceil(chunk.max(1)))
            .collect()
    }

    /// Store key of the outer chunk at grid position `indices`.
    pub fn chunk_key(&self, indices: &[usize]) -> String {
        self.store
            .join(&self.path, &self.metadata.chunk_key_encoding.encode(indices))
    }

    /// Decode the full array as C-order element bytes. Chunks missing from
    /// the store read as the fill value.
    pub async fn read_all(&self) -> ZarrResult<Vec<u8>> {
        let shape = &self.metadata.shape;
        let outer = self.metadata.outer_chunk_shape();
        let elem_size = self.metadata.data_type.byte_size();
        let repr = self.metadata.representation(outer.clone());
        let mut out = fill_bytes(&repr.fill_value, shape.iter().product());
        if out.is_empty() {
            return Ok(out);
        }

        let zero_origin = vec![0; shape.len()];
        for indices in cartesian_indices(&self.grid_shape()) {
            let key = self.chunk_key(&indices);
            let Some(encoded) = self.store.get(&key).await? else {
                continue;
            };
            let chunk = decode_chunk(&self.metadata.codecs, &encoded, &repr).await?;
            let (origin, region) = chunk_region(&indices, &outer, shape);
            copy_region(
                &chunk,
                &outer,
                &zero_origin,
                &mut out,
                shape,
                &origin,
                &region,
                elem_size,
            );
        }
        Ok(out)
    }

    /// Encode and store the full array from C-order element bytes.
    ///
    /// Outer chunks holding only the fill value are not stored, and any
    /// stale object at their key is erased.
    pub async fn write_all(&self, data: &[u8]) -> ZarrResult<()> {
        let shape = &self.metadata.shape;
        let elem_size = self.metadata.data_type.byte_size();
        let expected = shape.iter().product::<usize>() * elem_size;
        if data.len() != expected {
            return Err(ZarrError::Encode(format!(
                "Array {} expects {expected} bytes, got {}",
                self.path,
                data.len()
            )));
        }

        let outer = self.metadata.outer_chunk_shape();
        let repr = self.metadata.representation(outer.clone());
        let zero_origin = vec![0; shape.len()];
        for indices in cartesian_indices(&self.grid_shape()) {
            let key = self.chunk_key(&indices);
            let (origin, region) = chunk_region(&indices, &outer, shape);
            let mut chunk = fill_bytes(&repr.fill_value, repr.num_elements());
            copy_region(
                data,
                shape,
                &origin,
                &mut chunk,
                &outer,
                &zero_origin,
                &region,
                elem_size,
            );
            if chunk
                .chunks_exact(elem_size)
                .all(|element| element == repr.fill_value.as_slice())
            {
                self.store.erase(&key).await?;
                continue;
            }
            let encoded = encode_chunk(&self.metadata.codecs, &chunk, &repr).await?;
            self.store.set(&key, Bytes::from(encoded)).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Index math
// ---------------------------------------------------------------------------

/// Row-major strides, in elements, of an array of `shape`.
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut s: Vec<usize> = shape
        .iter()
        .rev()
        .scan(1usize, |state, &dim| {
            let stride = *state;
            *state *= dim;
            Some(stride)
        })
        .collect();
    s.reverse();
    s
}

/// Convert multi-dimensional indices to a flat row-major index.
pub fn linear_index(shape: &[usize], indices: &[usize]) -> usize {
    indices.iter().zip(strides(shape)).map(|(i, s)| i * s).sum()
}

/// Generate all multi-dimensional index tuples within the given shape, in
/// row-major order.
pub fn cartesian_indices(shape: &[usize]) -> Vec<Vec<usize>> {
    if shape.is_empty() {
        return vec![vec![]];
    }
    let first = shape[0];
    let rest = cartesian_indices(&shape[1..]);
    let mut result = Vec::with_capacity(first * rest.len());
    for i in 0..first {
        for r in &rest {
            let mut v = Vec::with_capacity(shape.len());
            v.push(i);
            v.extend_from_slice(r);
            result.push(v);
        }
    }
    result
}

/// Origin and in-bounds extent of the chunk at grid position `indices`.
/// Chunks on the upper edge of the array are truncated.
fn chunk_region(indices: &[usize], chunk: &[usize], shape: &[usize]) -> (Vec<usize>, Vec<usize>) {
    let origin: Vec<usize> = indices.iter().zip(chunk).map(|(i, c)| i * c).collect();
    let region = origin
        .iter()
        .zip(chunk)
        .zip(shape)
        .map(|((o, c), s)| (*c).min(s.saturating_sub(*o)))
        .collect();
    (origin, region)
}

/// Copy a box of `region` elements from `src` at `src_origin` to `dst` at
/// `dst_origin`. Both buffers are C-order with `elem_size`-byte elements.
#[allow(clippy::too_many_arguments)]
pub fn copy_region(
    src: &[u8],
    src_shape: &[usize],
    src_origin: &[usize],
    dst: &mut [u8],
    dst_shape: &[usize],
    dst_origin: &[usize],
    region: &[usize],
    elem_size: usize,
) {
    if region.contains(&0) {
        return;
    }
    let Some((&row_len, outer)) = region.split_last() else {
        // Rank 0: a single element.
        dst[..elem_size].copy_from_slice(&src[..elem_size]);
        return;
    };
    let run = row_len * elem_size;
    for mut position in cartesian_indices(outer) {
        position.push(0);
        let src_index: Vec<usize> = position.iter().zip(src_origin).map(|(p, o)| p + o).collect();
        let dst_index: Vec<usize> = position.iter().zip(dst_origin).map(|(p, o)| p + o).collect();
        let from = linear_index(src_shape, &src_index) * elem_size;
        let to = linear_index(dst_shape, &dst_index) * elem_size;
        dst[to..to + run].copy_from_slice(&src[from..from + run]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::AnyCodec;
    use crate::codecs::bytes::BytesCodec;
    use crate::codecs::compression::ZstdCodec;
    use crate::codecs::sharding::ShardingCodec;
    use crate::store::ObjectStoreBackend;
    use crate::types::{DataType, FillValue, ZarrValue};

    #[test]
    fn strides_are_row_major() {
        assert_eq!(strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(linear_index(&[2, 3, 4], &[1, 2, 3]), 23);
    }

    #[test]
    fn copy_region_moves_a_sub_box() {
        let src: Vec<u8> = (0..16).collect();
        let mut dst = vec![0u8; 4];
        copy_region(&src, &[4, 4], &[1, 2], &mut dst, &[2, 2], &[0, 0], &[2, 2], 1);
        assert_eq!(dst, vec![6, 7, 10, 11]);
    }

    #[test]
    fn edge_chunks_are_truncated() {
        let (origin, region) = chunk_region(&[2, 1], &[4, 4], &[10, 6]);
        assert_eq!(origin, vec![8, 4]);
        assert_eq!(region, vec![2, 2]);
    }

    fn metadata(codecs: Vec<AnyCodec>, chunk: Vec<usize>) -> ArrayMetadata {
        ArrayMetadata::new(
            vec![10, 6],
            DataType::UInt16,
            chunk,
            FillValue::Value(ZarrValue::UInt16(0)),
            codecs,
        )
    }

    #[tokio::test]
    async fn write_then_read_with_partial_edge_chunks() {
        let store = Arc::new(ObjectStoreBackend::in_memory());
        let codecs = vec![
            AnyCodec::Bytes(BytesCodec::default()),
            AnyCodec::Zstd(ZstdCodec::default()),
        ];
        let array = ZarrArray::create(store.clone(), "a", metadata(codecs, vec![4, 4]))
            .await
            .unwrap();
        let data: Vec<u8> = (1..=60u16).flat_map(u16::to_le_bytes).collect();
        array.write_all(&data).await.unwrap();

        let reopened = ZarrArray::open(store, "a").await.unwrap();
        assert_eq!(reopened.grid_shape(), vec![3, 2]);
        assert_eq!(reopened.read_all().await.unwrap(), data);
    }

    #[tokio::test]
    async fn fill_only_chunks_are_not_stored() {
        let store = Arc::new(ObjectStoreBackend::in_memory());
        let codecs = vec![AnyCodec::Sharding(ShardingCodec::new(
            vec![2, 2],
            vec![AnyCodec::Bytes(BytesCodec::default())],
        ))];
        let array = ZarrArray::create(store.clone(), "s", metadata(codecs, vec![4, 6]))
            .await
            .unwrap();
        let mut data = vec![0u8; 120];
        data[0] = 9;
        array.write_all(&data).await.unwrap();

        assert_eq!(
            store.list_prefix("s").await.unwrap(),
            vec!["s/c/0/0", "s/zarr.json"]
        );
        assert_eq!(array.read_all().await.unwrap(), data);
    }

    #[tokio::test]
    async fn opening_a_group_as_an_array_fails() {
        let store = Arc::new(ObjectStoreBackend::in_memory());
        store
            .set(
                "g/zarr.json",
                Bytes::from_static(br#"{"zarr_format":3,"node_type":"group"}"#),
            )
            .await
            .unwrap();
        assert!(ZarrArray::open(store.clone(), "g").await.is_err());
        assert!(matches!(
            ZarrArray::open(store, "missing").await,
            Err(ZarrError::NotFound(_))
        ));
    }
}
