//! Run configuration, loadable from JSON with per-field defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codecs::Compression;
use crate::error::ZarrResult;
use crate::layout::ShardMultipliers;
use crate::migrate::{ArrayMigrator, WriteStrategy};

fn default_disallowed() -> String {
    "zstd".to_string()
}

fn default_replacement() -> Compression {
    Compression::new("blosc-zstd", 5)
}

/// Settings for one migration run.
///
/// ```json
/// { "disallowed": "zstd", "replacement": { "name": "blosc-lz4", "level": 5 },
///   "strategy": "in-place", "multipliers": { "pyramid_leaf_2d": 8 } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationConfig {
    /// Compressor name that triggers a rewrite, compared case-insensitively.
    #[serde(default = "default_disallowed")]
    pub disallowed: String,
    #[serde(default = "default_replacement")]
    pub replacement: Compression,
    #[serde(default)]
    pub strategy: WriteStrategy,
    #[serde(default)]
    pub multipliers: ShardMultipliers,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            disallowed: default_disallowed(),
            replacement: default_replacement(),
            strategy: WriteStrategy::default(),
            multipliers: ShardMultipliers::default(),
            dry_run: false,
        }
    }
}

impl MigrationConfig {
    pub fn from_json(raw: &[u8]) -> ZarrResult<Self> {
        Ok(serde_json::from_slice(raw)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> ZarrResult<Self> {
        let raw = tokio::fs::read(path.as_ref()).await?;
        Self::from_json(&raw)
    }

    pub fn migrator(&self) -> ArrayMigrator {
        ArrayMigrator::new(self.replacement.clone(), self.multipliers, self.strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_documents_use_defaults() {
        let config = MigrationConfig::from_json(b"{}").unwrap();
        assert_eq!(config, MigrationConfig::default());
        assert_eq!(config.replacement, Compression::new("blosc-zstd", 5));
        assert_eq!(config.strategy, WriteStrategy::Staged);
    }

    #[test]
    fn partial_documents_override_fields() {
        let config = MigrationConfig::from_json(
            br#"{"disallowed": "gzip", "strategy": "in-place",
                 "multipliers": {"pyramid_leaf_2d": 8}}"#,
        )
        .unwrap();
        assert_eq!(config.disallowed, "gzip");
        assert_eq!(config.migrator().strategy(), WriteStrategy::InPlace);
        assert_eq!(config.multipliers.pyramid_leaf_2d, 8);
        assert_eq!(config.multipliers.original_dataset_2d, 4);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(MigrationConfig::from_json(br#"{"compressor": "zstd"}"#).is_err());
    }

    #[tokio::test]
    async fn configs_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.json");
        tokio::fs::write(&path, br#"{"dry_run": true}"#).await.unwrap();
        assert!(MigrationConfig::load(&path).await.unwrap().dry_run);
    }
}
