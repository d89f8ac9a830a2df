//! Walks a store, inspects every array and migrates the flagged ones.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::array::ZarrArray;
use crate::error::{ZarrError, ZarrResult};
use crate::hierarchy::{StoreNode, StoreWalker, WalkEntry, consolidate_metadata};
use crate::inspect::{Inspection, inspect_pipeline, raw_compression_names};
use crate::metadata::NodeMetadata;
use crate::migrate::{ArrayMigrator, MigrationRecord};
use crate::store::{StorageBackend, split_parent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum SkipReason {
    /// The disallowed compressor is not used.
    Clean,
    /// The pipeline shape is not one the inspector understands, or uses
    /// codecs this crate cannot decode.
    AmbiguousPipeline { detail: String },
    /// Flagged, but the run only reports.
    WouldMigrate { found: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Clean => f.write_str("clean"),
            SkipReason::AmbiguousPipeline { detail } => write!(f, "ambiguous pipeline ({detail})"),
            SkipReason::WouldMigrate { found } => write!(f, "would migrate {found}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// The original array is untouched.
    Io,
    /// The original array may be lost.
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub path: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub path: String,
    pub reason: SkipReason,
}

/// Every array visited by a run, partitioned by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub migrated: Vec<MigrationRecord>,
    pub skipped: Vec<Skipped>,
    pub failed: Vec<Failure>,
    /// Groups whose inline consolidated metadata was rewritten.
    pub consolidated: Vec<String>,
}

impl MigrationSummary {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn has_destructive_failures(&self) -> bool {
        self.failed
            .iter()
            .any(|f| f.kind == FailureKind::Destructive)
    }

    pub fn total(&self) -> usize {
        self.migrated.len() + self.skipped.len() + self.failed.len()
    }

    fn fail(&mut self, path: String, kind: FailureKind, message: String) {
        self.failed.push(Failure {
            path,
            kind,
            message,
        });
    }

    fn skip(&mut self, path: String, reason: SkipReason) {
        self.skipped.push(Skipped { path, reason });
    }
}

impl std::fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} arrays: {} migrated, {} skipped, {} failed",
            self.total(),
            self.migrated.len(),
            self.skipped.len(),
            self.failed.len()
        )
    }
}

pub struct MigrationOrchestrator<S: StorageBackend> {
    store: Arc<S>,
    migrator: ArrayMigrator,
    disallowed: String,
    dry_run: bool,
}

impl<S: StorageBackend> MigrationOrchestrator<S> {
    pub fn new(store: Arc<S>, migrator: ArrayMigrator, disallowed: impl Into<String>) -> Self {
        Self {
            store,
            migrator,
            disallowed: disallowed.into(),
            dry_run: false,
        }
    }

    /// Only inspect; flagged arrays are reported as [`SkipReason::WouldMigrate`].
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Migrate every flagged array below `root`, one at a time.
    ///
    /// Only an unreadable `root` is an error. Failures of individual arrays
    /// are recorded in the summary and the walk goes on.
    pub async fn run(&self, root: &str) -> ZarrResult<MigrationSummary> {
        let mut summary = MigrationSummary::default();
        for entry in StoreWalker::new(self.store.clone()).walk(root).await? {
            let (path, metadata) = match entry {
                WalkEntry::Node(StoreNode {
                    path,
                    metadata: NodeMetadata::Array(metadata),
                }) => (path, metadata),
                WalkEntry::Node(_) => continue,
                WalkEntry::Unsupported {
                    path,
                    document,
                    error,
                } => {
                    let names = raw_compression_names(&document);
                    if names.iter().any(|n| n.eq_ignore_ascii_case(&self.disallowed)) {
                        log::warn!(
                            "{path} uses {} but its metadata cannot be decoded, leaving it alone: {error}",
                            self.disallowed
                        );
                    } else {
                        log::info!("{path}: leaving unsupported metadata alone ({error})");
                    }
                    summary.skip(
                        path,
                        SkipReason::AmbiguousPipeline {
                            detail: error.to_string(),
                        },
                    );
                    continue;
                }
                WalkEntry::Unreadable { path, error } => {
                    log::warn!("cannot read {path}: {error}");
                    summary.fail(path, FailureKind::Io, error.to_string());
                    continue;
                }
            };

            let found = match inspect_pipeline(&metadata.codecs, &self.disallowed) {
                Inspection::Clean => {
                    log::debug!("{path} is clean");
                    summary.skip(path, SkipReason::Clean);
                    continue;
                }
                Inspection::Ambiguous { reason } => {
                    log::info!("{path}: leaving unrecognized pipeline alone ({reason})");
                    summary.skip(path, SkipReason::AmbiguousPipeline { detail: reason });
                    continue;
                }
                Inspection::NeedsMigration { found, .. } => found,
            };
            if self.dry_run {
                log::info!("{path}: would migrate {found}");
                summary.skip(
                    path,
                    SkipReason::WouldMigrate {
                        found: found.to_string(),
                    },
                );
                continue;
            }

            let array = match ZarrArray::open(self.store.clone(), &path).await {
                Ok(array) => array,
                Err(e) => {
                    log::warn!("cannot open {path}: {e}");
                    summary.fail(path, FailureKind::Io, e.to_string());
                    continue;
                }
            };
            match self.migrator.migrate(&array).await {
                Ok(record) => summary.migrated.push(record),
                Err(e) => {
                    let kind = if e.is_destructive() {
                        FailureKind::Destructive
                    } else {
                        FailureKind::Io
                    };
                    summary.fail(path, kind, e.to_string());
                }
            }
        }

        summary.consolidated = self.refresh_consolidated(&summary.migrated).await;
        log::info!("{summary}");
        Ok(summary)
    }

    /// Rebuild the consolidated metadata of every group that is an ancestor
    /// of a migrated array, up to the store root, deepest first.
    async fn refresh_consolidated(&self, migrated: &[MigrationRecord]) -> Vec<String> {
        let mut groups = BTreeSet::new();
        for record in migrated {
            let mut path = record.path.as_str();
            while !path.is_empty() {
                path = split_parent(path).0;
                groups.insert(path.to_string());
            }
        }

        let mut refreshed = Vec::new();
        for group in groups.into_iter().rev() {
            match consolidate_metadata(self.store.clone(), &group).await {
                Ok(true) => {
                    log::debug!("refreshed consolidated metadata at {group:?}");
                    refreshed.push(group);
                }
                Ok(false) => {}
                Err(ZarrError::NotFound(_)) => log::debug!("no group document at {group:?}"),
                Err(e) => log::warn!("could not refresh consolidated metadata at {group:?}: {e}"),
            }
        }
        refreshed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::Compression;
    use crate::group::ZarrGroup;
    use crate::layout::{LayoutRole, ShardMultipliers};
    use crate::migrate::WriteStrategy;
    use crate::store::ObjectStoreBackend;
    use crate::types::DataType;
    use crate::writer::{VariableSpec, write_variable};
    use serde_json::Map;

    async fn write(store: &Arc<ObjectStoreBackend>, path: &str, compressor: &str) -> Vec<u8> {
        let spec = VariableSpec::new(vec![40], DataType::Int16).with_chunks(vec![4]);
        let data: Vec<u8> = (0..40i16).flat_map(i16::to_le_bytes).collect();
        write_variable(
            store.clone(),
            path,
            &spec,
            LayoutRole::OriginalDataset,
            &Compression::new(compressor, 1),
            &ShardMultipliers::default(),
            &data,
        )
        .await
        .unwrap();
        data
    }

    fn orchestrator(store: Arc<ObjectStoreBackend>) -> MigrationOrchestrator<ObjectStoreBackend> {
        let migrator = ArrayMigrator::new(
            Compression::new("blosc-zstd", 5),
            ShardMultipliers::default(),
            WriteStrategy::Staged,
        );
        MigrationOrchestrator::new(store, migrator, "zstd")
    }

    #[tokio::test]
    async fn flagged_arrays_are_migrated_and_others_skipped() {
        let store = Arc::new(ObjectStoreBackend::in_memory());
        ZarrGroup::create(store.clone(), "ds", Map::new()).await.unwrap();
        let data = write(&store, "ds/a", "zstd").await;
        write(&store, "ds/b", "lz4").await;

        let summary = orchestrator(store.clone()).run("ds").await.unwrap();
        assert_eq!(summary.migrated.len(), 1);
        assert_eq!(summary.migrated[0].path, "ds/a");
        assert_eq!(
            summary.skipped,
            vec![Skipped {
                path: "ds/b".into(),
                reason: SkipReason::Clean
            }]
        );
        assert!(!summary.has_failures());
        assert!(summary.consolidated.is_empty());

        let migrated = ZarrArray::open(store.clone(), "ds/a").await.unwrap();
        assert_eq!(migrated.read_all().await.unwrap(), data);

        let again = orchestrator(store).run("ds").await.unwrap();
        assert!(again.migrated.is_empty());
        assert_eq!(again.skipped.len(), 2);
    }

    #[tokio::test]
    async fn dry_runs_leave_the_store_alone() {
        let store = Arc::new(ObjectStoreBackend::in_memory());
        ZarrGroup::create(store.clone(), "", Map::new()).await.unwrap();
        write(&store, "a", "zstd").await;
        let before = store.list_prefix("").await.unwrap();

        let summary = orchestrator(store.clone())
            .with_dry_run(true)
            .run("")
            .await
            .unwrap();
        assert!(summary.migrated.is_empty());
        assert_eq!(
            summary.skipped[0].reason,
            SkipReason::WouldMigrate {
                found: "zstd(1)".into()
            }
        );
        assert_eq!(store.list_prefix("").await.unwrap(), before);
    }

    #[tokio::test]
    async fn undecodable_pipelines_are_skipped_not_failed() {
        testing_logger::setup();
        let store = Arc::new(ObjectStoreBackend::in_memory());
        ZarrGroup::create(store.clone(), "ds", Map::new()).await.unwrap();
        let transposed = serde_json::json!({
            "zarr_format": 3,
            "node_type": "array",
            "shape": [4, 4],
            "data_type": "uint8",
            "chunk_grid": {"name": "regular", "configuration": {"chunk_shape": [4, 4]}},
            "fill_value": 0,
            "codecs": [
                {"name": "transpose", "configuration": {"order": [1, 0]}},
                {"name": "bytes"},
                {"name": "zstd", "configuration": {"level": 1}}
            ]
        });
        store
            .set(
                "ds/t/zarr.json",
                bytes::Bytes::from(serde_json::to_vec(&transposed).unwrap()),
            )
            .await
            .unwrap();
        write(&store, "ds/u", "zstd").await;

        let summary = orchestrator(store).run("ds").await.unwrap();
        assert!(!summary.has_failures());
        assert_eq!(summary.migrated.len(), 1);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].path, "ds/t");
        assert!(matches!(
            &summary.skipped[0].reason,
            SkipReason::AmbiguousPipeline { detail } if detail.contains("transpose")
        ));
        testing_logger::validate(|logs| {
            assert!(logs
                .iter()
                .any(|l| l.level == log::Level::Warn && l.body.contains("ds/t uses zstd")));
        });
    }

    #[tokio::test]
    async fn unreadable_arrays_are_io_failures() {
        let store = Arc::new(ObjectStoreBackend::in_memory());
        ZarrGroup::create(store.clone(), "ds", Map::new()).await.unwrap();
        store
            .set("ds/broken/zarr.json", bytes::Bytes::from_static(b"[]"))
            .await
            .unwrap();
        write(&store, "ds/ok", "zstd").await;

        let summary = orchestrator(store).run("ds").await.unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].kind, FailureKind::Io);
        assert_eq!(summary.migrated.len(), 1);
        assert_eq!(summary.to_string(), "2 arrays: 1 migrated, 0 skipped, 1 failed");
    }
}
