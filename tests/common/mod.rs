#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value, json};
use zarrmigrate::metadata::ConsolidatedMetadata;
use zarrmigrate::{
    Compression, DataType, FillValue, LayoutRole, ShardMultipliers, StorageBackend, VariableSpec,
    ZarrError, ZarrGroup, ZarrResult, write_variable,
};

/// Wraps a backend and injects failures: reads or writes of chunk keys
/// below an array, listings of a group, and renames out of a prefix.
pub struct FailingBackend<S> {
    inner: S,
    fail_reads_under: Option<String>,
    fail_writes_under: Option<String>,
    fail_lists_of: Option<String>,
    fail_renames_from: Vec<String>,
    partial_renames_from: Option<String>,
}

impl<S: StorageBackend> FailingBackend<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_reads_under: None,
            fail_writes_under: None,
            fail_lists_of: None,
            fail_renames_from: Vec::new(),
            partial_renames_from: None,
        }
    }

    pub fn failing_reads(mut self, array_path: &str) -> Self {
        self.fail_reads_under = Some(format!("{array_path}/c"));
        self
    }

    pub fn failing_writes(mut self, array_path: &str) -> Self {
        self.fail_writes_under = Some(format!("{array_path}/c"));
        self
    }

    pub fn failing_lists(mut self, group_path: &str) -> Self {
        self.fail_lists_of = Some(group_path.to_string());
        self
    }

    /// Renames out of `from` fail before moving anything.
    pub fn failing_renames(mut self, from: &str) -> Self {
        self.fail_renames_from.push(from.to_string());
        self
    }

    /// Renames out of `from` move one key and then fail.
    pub fn partially_failing_renames(mut self, from: &str) -> Self {
        self.partial_renames_from = Some(from.to_string());
        self
    }

    fn hits(rule: &Option<String>, key: &str) -> bool {
        rule.as_deref().is_some_and(|prefix| key.starts_with(prefix))
    }
}

#[async_trait]
impl<S: StorageBackend> StorageBackend for FailingBackend<S> {
    async fn get(&self, path: &str) -> ZarrResult<Option<Bytes>> {
        if Self::hits(&self.fail_reads_under, path) {
            return Err(ZarrError::Storage(format!("injected read failure at {path}")));
        }
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, value: Bytes) -> ZarrResult<()> {
        if Self::hits(&self.fail_writes_under, path) {
            return Err(ZarrError::Storage(format!("injected write failure at {path}")));
        }
        self.inner.set(path, value).await
    }

    async fn erase(&self, path: &str) -> ZarrResult<()> {
        self.inner.erase(path).await
    }

    async fn list(&self, prefix: &str) -> ZarrResult<Vec<String>> {
        if self.fail_lists_of.as_deref() == Some(prefix) {
            return Err(ZarrError::Storage(format!("injected list failure at {prefix}")));
        }
        self.inner.list(prefix).await
    }

    async fn list_prefix(&self, prefix: &str) -> ZarrResult<Vec<String>> {
        self.inner.list_prefix(prefix).await
    }

    async fn erase_prefix(&self, prefix: &str) -> ZarrResult<()> {
        self.inner.erase_prefix(prefix).await
    }

    async fn rename_prefix(&self, from: &str, to: &str) -> ZarrResult<()> {
        if self.fail_renames_from.iter().any(|f| f == from) {
            return Err(ZarrError::Storage(format!("injected rename failure at {from}")));
        }
        if self.partial_renames_from.as_deref() == Some(from) {
            if let Some(first) = self.inner.list_prefix(from).await?.into_iter().next() {
                let value = self.inner.get(&first).await?.unwrap_or_default();
                self.inner.set(&format!("{to}{}", &first[from.len()..]), value).await?;
                self.inner.erase(&first).await?;
            }
            return Err(ZarrError::Storage(format!("injected partial rename at {from}")));
        }
        self.inner.rename_prefix(from, to).await
    }

    fn join(&self, base: &str, segment: &str) -> String {
        self.inner.join(base, segment)
    }
}

/// `objects` with the `from` prefix of every key replaced by `to`.
pub fn rebased(objects: &BTreeMap<String, Bytes>, from: &str, to: &str) -> BTreeMap<String, Bytes> {
    objects
        .iter()
        .map(|(key, value)| (format!("{to}{}", &key[from.len()..]), value.clone()))
        .collect()
}

/// Every key below `prefix` with its stored bytes.
pub async fn snapshot<S: StorageBackend>(store: &S, prefix: &str) -> BTreeMap<String, Bytes> {
    let mut objects = BTreeMap::new();
    for key in store.list_prefix(prefix).await.unwrap() {
        let value = store.get(&key).await.unwrap().unwrap_or_default();
        objects.insert(key, value);
    }
    objects
}

pub fn f32_ramp(len: usize) -> Vec<u8> {
    (0..len).flat_map(|i| (i as f32 * 0.5).to_le_bytes()).collect()
}

pub async fn write<S: StorageBackend>(
    store: &Arc<S>,
    path: &str,
    spec: &VariableSpec,
    role: LayoutRole,
    compression: Compression,
    data: &[u8],
) {
    write_variable(
        store.clone(),
        path,
        spec,
        role,
        &compression,
        &ShardMultipliers::default(),
        data,
    )
    .await
    .unwrap();
}

/// A small multiscale dataset as a producer would write it:
///
/// ```text
/// /                 consolidated root group
/// 0/elevation       f32 64x96, zstd inside shards
/// 1/elevation       f32 32x48, zstd inside shards
/// original/time     i64 1440, zstd inside one shard
/// original/mask     u8 40x40, lz4 inside shards
/// original/cube     i32 4x6x8, flat zstd
/// ```
pub async fn pyramid_store<S: StorageBackend>(store: &Arc<S>) -> BTreeMap<&'static str, Vec<u8>> {
    let mut attributes = Map::new();
    attributes.insert("title".into(), json!("test pyramid"));
    let mut root = ZarrGroup::create(store.clone(), "", attributes).await.unwrap();
    for group in ["0", "1", "original"] {
        ZarrGroup::create(store.clone(), group, Map::new()).await.unwrap();
    }

    let mut written = BTreeMap::new();
    for (path, shape) in [("0/elevation", [64, 96]), ("1/elevation", [32, 48])] {
        let spec = VariableSpec::new(shape.to_vec(), DataType::Float32)
            .with_chunks(vec![16, 16])
            .with_fill_value(FillValue::NaN)
            .with_dimension_names(["y", "x"])
            .with_attribute("units", Value::from("m"));
        let data = f32_ramp(shape.iter().product());
        write(store, path, &spec, LayoutRole::PyramidLeaf, Compression::new("zstd", 3), &data).await;
        written.insert(path, data);
    }

    let spec = VariableSpec::new(vec![1440], DataType::Int64)
        .with_chunks(vec![1440])
        .with_dimension_names(["time"]);
    let data: Vec<u8> = (0..1440i64).flat_map(|t| (t * 60).to_le_bytes()).collect();
    write(store, "original/time", &spec, LayoutRole::PyramidLeaf, Compression::new("zstd", 0), &data).await;
    written.insert("original/time", data);

    let spec = VariableSpec::new(vec![40, 40], DataType::UInt8).with_chunks(vec![10, 10]);
    let data: Vec<u8> = (0..1600u32).map(|i| (i % 7) as u8).collect();
    write(store, "original/mask", &spec, LayoutRole::OriginalDataset, Compression::new("lz4", 1), &data).await;
    written.insert("original/mask", data);

    let spec = VariableSpec::new(vec![4, 6, 8], DataType::Int32).with_chunks(vec![2, 3, 8]);
    let data: Vec<u8> = (0..192i32).flat_map(|v| (v - 96).to_le_bytes()).collect();
    write(store, "original/cube", &spec, LayoutRole::OriginalDataset, Compression::new("zstd", 1), &data).await;
    written.insert("original/cube", data);

    let mut metadata = root.metadata().clone();
    metadata.consolidated_metadata = Some(ConsolidatedMetadata::inline(BTreeMap::new()));
    root.set_metadata(metadata).await.unwrap();
    zarrmigrate::consolidate_metadata(store.clone(), "").await.unwrap();
    written
}
