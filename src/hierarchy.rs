//! Traversal of a group/array tree and inline metadata consolidation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{ZarrError, ZarrResult};
use crate::group::ZarrGroup;
use crate::metadata::v3::METADATA_KEY;
use crate::metadata::{ConsolidatedEntry, ConsolidatedMetadata, NodeMetadata};
use crate::migrate::{BACKUP_PREFIX, STAGING_PREFIX};
use crate::store::StorageBackend;

/// A node found in the store together with its parsed `zarr.json`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreNode {
    pub path: String,
    pub metadata: NodeMetadata,
}

#[derive(Debug)]
pub enum WalkEntry {
    Node(StoreNode),
    /// An array document that is valid JSON but uses codecs or a data type
    /// this crate does not model.
    Unsupported {
        path: String,
        document: Value,
        error: ZarrError,
    },
    /// A node whose metadata or listing could not be read.
    Unreadable { path: String, error: ZarrError },
}

impl WalkEntry {
    pub fn path(&self) -> &str {
        match self {
            WalkEntry::Node(node) => &node.path,
            WalkEntry::Unsupported { path, .. } | WalkEntry::Unreadable { path, .. } => path,
        }
    }
}

/// Working copies left by the migrator, which the walker never enters.
pub fn is_working_copy(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX) || name.starts_with(BACKUP_PREFIX)
}

enum NodeDocument {
    Missing,
    Parsed(NodeMetadata),
    Unsupported { document: Value, error: ZarrError },
}

/// Depth-first, pre-order walker: a group, then its arrays, then each of
/// its subgroups in turn. Siblings are visited in name order.
pub struct StoreWalker<S: StorageBackend> {
    store: Arc<S>,
}

impl<S: StorageBackend> StoreWalker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn read_node(&self, path: &str) -> ZarrResult<NodeDocument> {
        let Some(raw) = self.store.get(&self.store.join(path, METADATA_KEY)).await? else {
            return Ok(NodeDocument::Missing);
        };
        match NodeMetadata::from_json(&raw) {
            Ok(metadata) => Ok(NodeDocument::Parsed(metadata)),
            Err(error) => match serde_json::from_slice::<Value>(&raw) {
                Ok(document) if document["node_type"] == "array" => {
                    Ok(NodeDocument::Unsupported { document, error })
                }
                _ => Err(error),
            },
        }
    }

    /// Every node below (and including) `root`.
    ///
    /// Fails only when `root` itself cannot be read; problems with
    /// descendants, or with listing any group, are reported as entries.
    pub async fn walk(&self, root: &str) -> ZarrResult<Vec<WalkEntry>> {
        let metadata = match self.read_node(root).await? {
            NodeDocument::Parsed(metadata) => metadata,
            NodeDocument::Unsupported { document, error } => {
                return Ok(vec![WalkEntry::Unsupported {
                    path: root.to_string(),
                    document,
                    error,
                }]);
            }
            NodeDocument::Missing => {
                return Err(ZarrError::NotFound(format!("No zarr.json at {root:?}")));
            }
        };
        let mut entries = Vec::new();
        let mut pending = vec![StoreNode {
            path: root.to_string(),
            metadata,
        }];

        while let Some(node) = pending.pop() {
            let is_group = matches!(node.metadata, NodeMetadata::Group(_));
            let path = node.path.clone();
            entries.push(WalkEntry::Node(node));
            if !is_group {
                continue;
            }

            let names = match self.store.list(&path).await {
                Ok(names) => names,
                Err(error) => {
                    log::warn!("cannot list {path:?}, skipping its children: {error}");
                    entries.push(WalkEntry::Unreadable { path, error });
                    continue;
                }
            };
            let mut subgroups = Vec::new();
            for name in names {
                if name == METADATA_KEY || is_working_copy(&name) {
                    continue;
                }
                let child = self.store.join(&path, &name);
                match self.read_node(&child).await {
                    Ok(NodeDocument::Parsed(metadata @ NodeMetadata::Group(_))) => {
                        subgroups.push(StoreNode {
                            path: child,
                            metadata,
                        })
                    }
                    Ok(NodeDocument::Parsed(metadata)) => entries.push(WalkEntry::Node(StoreNode {
                        path: child,
                        metadata,
                    })),
                    Ok(NodeDocument::Unsupported { document, error }) => {
                        entries.push(WalkEntry::Unsupported {
                            path: child,
                            document,
                            error,
                        })
                    }
                    Ok(NodeDocument::Missing) => {
                        log::warn!("{child} has no {METADATA_KEY} and is not recognized. Ignoring.")
                    }
                    Err(error) => entries.push(WalkEntry::Unreadable { path: child, error }),
                }
            }
            pending.extend(subgroups.into_iter().rev());
        }
        Ok(entries)
    }
}

fn relative_to<'a>(root: &str, path: &'a str) -> &'a str {
    path.strip_prefix(root)
        .map(|p| p.trim_start_matches('/'))
        .unwrap_or(path)
}

/// Rebuild the inline consolidated metadata of the group at `root` from the
/// documents currently in the store.
///
/// Returns `false` without writing anything when the group is not
/// consolidated. Entries below a node that cannot be read keep their
/// previous consolidated documents.
pub async fn consolidate_metadata<S: StorageBackend>(store: Arc<S>, root: &str) -> ZarrResult<bool> {
    let mut group = ZarrGroup::open(store.clone(), root).await?;
    let Some(previous) = group.metadata().consolidated_metadata.clone() else {
        return Ok(false);
    };

    let mut consolidated = BTreeMap::new();
    let mut unreadable = Vec::new();
    for entry in StoreWalker::new(store).walk(root).await? {
        match entry {
            WalkEntry::Node(node) if node.path == root => {}
            WalkEntry::Node(StoreNode { path, mut metadata }) => {
                if let NodeMetadata::Group(g) = &mut metadata {
                    g.consolidated_metadata = None;
                }
                consolidated.insert(
                    relative_to(root, &path).to_string(),
                    ConsolidatedEntry::Node(metadata),
                );
            }
            WalkEntry::Unsupported { path, document, .. } => {
                consolidated.insert(
                    relative_to(root, &path).to_string(),
                    ConsolidatedEntry::Opaque(document),
                );
            }
            WalkEntry::Unreadable { path, error } => {
                log::warn!("keeping the previous consolidated entries below {path:?}: {error}");
                unreadable.push(relative_to(root, &path).to_string());
            }
        }
    }
    for (key, entry) in previous.metadata {
        let hidden = unreadable.iter().any(|prefix| {
            prefix.is_empty()
                || key == *prefix
                || key.strip_prefix(prefix.as_str()).is_some_and(|rest| rest.starts_with('/'))
        });
        if hidden {
            consolidated.entry(key).or_insert(entry);
        }
    }

    let mut metadata = group.metadata().clone();
    metadata.consolidated_metadata = Some(ConsolidatedMetadata::inline(consolidated));
    group.set_metadata(metadata).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::GroupMetadata;
    use crate::store::ObjectStoreBackend;
    use bytes::Bytes;
    use serde_json::Map;

    const ARRAY: &str = r#"{"zarr_format":3,"node_type":"array","shape":[2],"data_type":"uint8",
        "chunk_grid":{"name":"regular","configuration":{"chunk_shape":[2]}},
        "fill_value":0,"codecs":[{"name":"bytes"}]}"#;
    const GROUP: &str = r#"{"zarr_format":3,"node_type":"group"}"#;
    const TRANSPOSED: &str = r#"{"zarr_format":3,"node_type":"array","shape":[2,2],
        "data_type":"uint8","chunk_grid":{"name":"regular","configuration":{"chunk_shape":[2,2]}},
        "fill_value":0,"codecs":[{"name":"transpose","configuration":{"order":[1,0]}},
        {"name":"bytes"}]}"#;

    async fn tree() -> Arc<ObjectStoreBackend> {
        let store = Arc::new(ObjectStoreBackend::in_memory());
        for (key, doc) in [
            ("root/zarr.json", GROUP),
            ("root/b/zarr.json", GROUP),
            ("root/b/x/zarr.json", ARRAY),
            ("root/a/zarr.json", GROUP),
            ("root/a/y/zarr.json", ARRAY),
            ("root/z/zarr.json", ARRAY),
            ("root/bad/zarr.json", "{not json"),
            ("root/__migrating__z/zarr.json", ARRAY),
            ("root/__original__x/zarr.json", ARRAY),
            ("root/__user/zarr.json", ARRAY),
            ("root/t/zarr.json", TRANSPOSED),
            ("root/loose/c/0", "x"),
        ] {
            store.set(key, Bytes::from(doc)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn walk_is_pre_order_and_sorted() {
        testing_logger::setup();
        let store = tree().await;
        let entries = StoreWalker::new(store).walk("root").await.unwrap();
        let paths: Vec<&str> = entries.iter().map(WalkEntry::path).collect();
        assert_eq!(
            paths,
            vec![
                "root",
                "root/__user",
                "root/bad",
                "root/t",
                "root/z",
                "root/a",
                "root/a/y",
                "root/b",
                "root/b/x"
            ]
        );
        assert!(matches!(entries[2], WalkEntry::Unreadable { .. }));
        assert!(matches!(entries[3], WalkEntry::Unsupported { .. }));
        testing_logger::validate(|logs| {
            assert!(logs.iter().any(|l| l.body.contains("root/loose")));
        });
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let store = Arc::new(ObjectStoreBackend::in_memory());
        assert!(StoreWalker::new(store).walk("nowhere").await.is_err());
    }

    #[tokio::test]
    async fn consolidation_only_touches_consolidated_groups() {
        let store = tree().await;
        assert!(!consolidate_metadata(store.clone(), "root").await.unwrap());

        let mut group = ZarrGroup::open(store.clone(), "root").await.unwrap();
        let mut md = GroupMetadata::new(Map::new());
        md.consolidated_metadata = Some(ConsolidatedMetadata::inline(BTreeMap::new()));
        group.set_metadata(md).await.unwrap();

        assert!(consolidate_metadata(store.clone(), "root").await.unwrap());
        let group = ZarrGroup::open(store, "root").await.unwrap();
        let children = &group.metadata().consolidated_metadata.as_ref().unwrap().metadata;
        let keys: Vec<&str> = children.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["__user", "a", "a/y", "b", "b/x", "t", "z"]);
        assert!(matches!(children["t"], ConsolidatedEntry::Opaque(_)));
    }

    #[test]
    fn only_migrator_copies_are_working_copies() {
        assert!(is_working_copy("__migrating__elevation"));
        assert!(is_working_copy("__original__elevation"));
        assert!(!is_working_copy("__user"));
        assert!(!is_working_copy("elevation"));
    }
}
