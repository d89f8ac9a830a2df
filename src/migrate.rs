//! Rewriting one array with a replacement compressor.
//!
//! The array is decoded in full, a new pipeline is derived from its outer
//! chunk geometry and the data is written back at the same path. How the
//! original is replaced depends on the [`WriteStrategy`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::array::ZarrArray;
use crate::codecs::{Compression, describe_pipeline};
use crate::error::{MigrationError, ZarrError, ZarrResult};
use crate::layout::{ShardMultipliers, inner_chunk_shape};
use crate::metadata::{ArrayMetadata, ChunkGrid};
use crate::store::{StorageBackend, split_parent};
use crate::writer::codec_pipeline;

/// Name prefixes of the sibling copies a staged migration works with.
pub const STAGING_PREFIX: &str = "__migrating__";
pub const BACKUP_PREFIX: &str = "__original__";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteStrategy {
    /// Write and verify a sibling copy, then swap it in by renaming.
    #[default]
    Staged,
    /// Erase the original, then recreate it at the same path.
    InPlace,
}

impl std::fmt::Display for WriteStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteStrategy::Staged => f.write_str("staged"),
            WriteStrategy::InPlace => f.write_str("in-place"),
        }
    }
}

impl std::str::FromStr for WriteStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "staged" => Ok(WriteStrategy::Staged),
            "in-place" | "inplace" => Ok(WriteStrategy::InPlace),
            other => Err(format!("Unknown write strategy: {other}")),
        }
    }
}

/// Outcome of one successful migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub path: String,
    pub old_codec: String,
    pub new_codec: String,
}

impl std::fmt::Display for MigrationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} -> {}", self.path, self.old_codec, self.new_codec)
    }
}

#[derive(Debug, Clone)]
pub struct ArrayMigrator {
    replacement: Compression,
    multipliers: ShardMultipliers,
    strategy: WriteStrategy,
}

impl ArrayMigrator {
    pub fn new(
        replacement: Compression,
        multipliers: ShardMultipliers,
        strategy: WriteStrategy,
    ) -> Self {
        Self {
            replacement,
            multipliers,
            strategy,
        }
    }

    pub fn strategy(&self) -> WriteStrategy {
        self.strategy
    }

    /// Metadata of the migrated array: same shape, data type, fill value,
    /// attributes and dimension names; outer grid kept; new codecs.
    pub fn migrated_metadata(&self, old: &ArrayMetadata) -> ZarrResult<ArrayMetadata> {
        let outer = old.outer_chunk_shape();
        let inner = inner_chunk_shape(&outer, &self.multipliers);
        if inner.is_none() {
            log::debug!("outer chunk {outer:?} is rewritten without sharding");
        }
        let codecs = codec_pipeline(old.data_type, old.endian(), &self.replacement, inner)?;
        let metadata = ArrayMetadata {
            chunk_grid: Some(ChunkGrid::regular(outer)),
            codecs,
            ..old.clone()
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// Rewrite `array` with the replacement compressor.
    pub async fn migrate<S: StorageBackend>(
        &self,
        array: &ZarrArray<S>,
    ) -> Result<MigrationRecord, MigrationError> {
        let path = array.path().to_string();
        let recoverable = |source: ZarrError| MigrationError::Recoverable {
            path: path.clone(),
            source,
        };

        let data = array.read_all().await.map_err(recoverable)?;
        let new_metadata = self
            .migrated_metadata(array.metadata())
            .map_err(recoverable)?;
        let record = MigrationRecord {
            path: path.clone(),
            old_codec: describe_pipeline(&array.metadata().codecs),
            new_codec: describe_pipeline(&new_metadata.codecs),
        };

        let strategy = if path.is_empty() && self.strategy == WriteStrategy::Staged {
            log::warn!("the store root cannot be staged, rewriting it in place");
            WriteStrategy::InPlace
        } else {
            self.strategy
        };
        let result = match strategy {
            WriteStrategy::Staged => staged_replace(array, new_metadata, &data).await,
            WriteStrategy::InPlace => in_place_replace(array, new_metadata, &data).await,
        };

        match result {
            Ok(()) => {
                log::info!("{record}");
                Ok(record)
            }
            Err(e) => {
                if e.is_destructive() {
                    log::error!("{e}");
                } else {
                    log::warn!("{e}");
                }
                Err(e)
            }
        }
    }
}

/// Check that the array at `path` decodes to `expected` under `metadata`.
async fn verify<S: StorageBackend>(
    store: Arc<S>,
    path: &str,
    metadata: &ArrayMetadata,
    expected: &[u8],
) -> ZarrResult<()> {
    let written = ZarrArray::open(store, path).await?;
    let md = written.metadata();
    if md.shape != metadata.shape
        || md.data_type != metadata.data_type
        || md.fill_bytes() != metadata.fill_bytes()
    {
        return Err(ZarrError::Validation(format!(
            "{path} metadata does not match what was written"
        )));
    }
    if written.read_all().await? != expected {
        return Err(ZarrError::Validation(format!(
            "{path} does not decode to the original data"
        )));
    }
    Ok(())
}

async fn staged_replace<S: StorageBackend>(
    array: &ZarrArray<S>,
    metadata: ArrayMetadata,
    data: &[u8],
) -> Result<(), MigrationError> {
    let store = array.store();
    let path = array.path();
    let (parent, name) = split_parent(path);
    let staging = store.join(parent, &format!("{STAGING_PREFIX}{name}"));
    let backup = store.join(parent, &format!("{BACKUP_PREFIX}{name}"));
    let recoverable = |source: ZarrError| MigrationError::Recoverable {
        path: path.to_string(),
        source,
    };
    let destructive = |source: ZarrError| MigrationError::Destructive {
        path: path.to_string(),
        source,
    };

    if !store.list_prefix(&backup).await.map_err(recoverable)?.is_empty() {
        return Err(recoverable(ZarrError::Storage(format!(
            "A backup from an earlier run is still present at {backup}"
        ))));
    }
    store.erase_prefix(&staging).await.map_err(recoverable)?;

    let staged = async {
        let staged = ZarrArray::create(store.clone(), &staging, metadata.clone()).await?;
        staged.write_all(data).await?;
        verify(store.clone(), &staging, &metadata, data).await
    };
    if let Err(e) = staged.await {
        if let Err(cleanup) = store.erase_prefix(&staging).await {
            log::warn!("could not remove staging copy {staging}: {cleanup}");
        }
        return Err(recoverable(e));
    }

    if let Err(e) = store.rename_prefix(path, &backup).await {
        return match store.list_prefix(&backup).await {
            Ok(moved) if moved.is_empty() => {
                if let Err(cleanup) = store.erase_prefix(&staging).await {
                    log::warn!("could not remove staging copy {staging}: {cleanup}");
                }
                Err(recoverable(e))
            }
            _ => Err(destructive(ZarrError::Storage(format!(
                "original only partially moved to {backup}: {e}"
            )))),
        };
    }

    if let Err(e) = store.rename_prefix(&staging, path).await {
        let restored = async {
            store.erase_prefix(path).await?;
            store.rename_prefix(&backup, path).await
        };
        return match restored.await {
            Ok(()) => {
                if let Err(cleanup) = store.erase_prefix(&staging).await {
                    log::warn!("could not remove staging copy {staging}: {cleanup}");
                }
                Err(recoverable(e))
            }
            Err(restore) => Err(destructive(ZarrError::Storage(format!(
                "{e}; restoring the original from {backup} also failed: {restore}"
            )))),
        };
    }

    if let Err(e) = store.erase_prefix(&backup).await {
        log::warn!("migrated {path} but could not remove backup {backup}: {e}");
    }
    Ok(())
}

async fn in_place_replace<S: StorageBackend>(
    array: &ZarrArray<S>,
    metadata: ArrayMetadata,
    data: &[u8],
) -> Result<(), MigrationError> {
    let store = array.store();
    let path = array.path();
    let rewrite = async {
        store.erase_prefix(path).await?;
        let recreated = ZarrArray::create(store.clone(), path, metadata).await?;
        recreated.write_all(data).await
    };
    rewrite.await.map_err(|source| MigrationError::Destructive {
        path: path.to_string(),
        source,
    })
}
