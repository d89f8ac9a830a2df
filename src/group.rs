use std::sync::Arc;

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::{ZarrError, ZarrResult};
use crate::metadata::v3::METADATA_KEY;
use crate::metadata::{GroupMetadata, NodeMetadata};
use crate::store::StorageBackend;

/// One group node of a store.
pub struct ZarrGroup<S: StorageBackend> {
    store: Arc<S>,
    path: String,
    metadata: GroupMetadata,
}

impl<S: StorageBackend> std::fmt::Debug for ZarrGroup<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZarrGroup")
            .field("path", &self.path)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl<S: StorageBackend> ZarrGroup<S> {
    pub async fn open(store: Arc<S>, path: &str) -> ZarrResult<Self> {
        let key = store.join(path, METADATA_KEY);
        let raw = store
            .get(&key)
            .await?
            .ok_or_else(|| ZarrError::NotFound(format!("No group metadata at {key}")))?;
        match NodeMetadata::from_json(&raw)? {
            NodeMetadata::Group(metadata) => Ok(Self {
                store,
                path: path.to_string(),
                metadata,
            }),
            NodeMetadata::Array(_) => Err(ZarrError::Metadata(format!(
                "{path} is an array, not a group"
            ))),
        }
    }

    /// Create (or overwrite) the group document at `path`.
    pub async fn create(
        store: Arc<S>,
        path: &str,
        attributes: Map<String, Value>,
    ) -> ZarrResult<Self> {
        let group = Self {
            store,
            path: path.to_string(),
            metadata: GroupMetadata::new(attributes),
        };
        group.write_metadata().await?;
        Ok(group)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn metadata(&self) -> &GroupMetadata {
        &self.metadata
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.metadata.attributes
    }

    pub fn is_consolidated(&self) -> bool {
        self.metadata.consolidated_metadata.is_some()
    }

    /// Replace the group document, e.g. after refreshing its consolidated
    /// metadata.
    pub async fn set_metadata(&mut self, metadata: GroupMetadata) -> ZarrResult<()> {
        self.metadata = metadata;
        self.write_metadata().await
    }

    async fn write_metadata(&self) -> ZarrResult<()> {
        let doc = NodeMetadata::Group(self.metadata.clone()).to_json()?;
        self.store
            .set(&self.store.join(&self.path, METADATA_KEY), Bytes::from(doc))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ConsolidatedMetadata;
    use crate::store::LocalBackend;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn groups_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalBackend::new(dir.path()));
        let mut attrs = Map::new();
        attrs.insert("title".into(), Value::from("pyramid"));
        let mut group = ZarrGroup::create(store.clone(), "root", attrs).await.unwrap();
        assert!(!group.is_consolidated());

        let mut md = group.metadata().clone();
        md.consolidated_metadata = Some(ConsolidatedMetadata::inline(BTreeMap::new()));
        group.set_metadata(md).await.unwrap();

        let reopened = ZarrGroup::open(store, "root").await.unwrap();
        assert_eq!(reopened.attributes()["title"], "pyramid");
        assert!(reopened.is_consolidated());
    }
}
