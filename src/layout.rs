//! Chunk and shard geometry for newly written arrays.
//!
//! Geometry only depends on the array's rank and its role in the dataset:
//! pyramid levels get large shards, the full-resolution dataset smaller
//! ones. Arrays of rank 0 or above 2 are never sharded.

use serde::{Deserialize, Serialize};

/// What an array is used for, which decides how many chunks go in a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutRole {
    PyramidLeaf,
    OriginalDataset,
}

impl std::fmt::Display for LayoutRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutRole::PyramidLeaf => f.write_str("pyramid-leaf"),
            LayoutRole::OriginalDataset => f.write_str("original-dataset"),
        }
    }
}

impl std::str::FromStr for LayoutRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "pyramid-leaf" | "pyramid" => Ok(LayoutRole::PyramidLeaf),
            "original-dataset" | "original" => Ok(LayoutRole::OriginalDataset),
            other => Err(format!("Unknown layout role: {other}")),
        }
    }
}

/// Chunks-per-shard multipliers used when planning, and the divisors used
/// to split an existing shard into inner chunks when migrating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardMultipliers {
    pub pyramid_leaf_2d: usize,
    pub original_dataset_2d: usize,
    pub pyramid_leaf_1d: usize,
    pub original_dataset_1d: usize,
    pub inner_divisor_2d: usize,
    pub inner_divisor_1d: usize,
}

impl Default for ShardMultipliers {
    fn default() -> Self {
        Self {
            pyramid_leaf_2d: 16,
            original_dataset_2d: 4,
            pyramid_leaf_1d: 256,
            original_dataset_1d: 16,
            inner_divisor_2d: 16,
            inner_divisor_1d: 256,
        }
    }
}

impl ShardMultipliers {
    /// Per-axis shard multiplier, or `None` for ranks that are not sharded.
    pub fn multiplier(&self, rank: usize, role: LayoutRole) -> Option<usize> {
        let m = match (rank, role) {
            (2, LayoutRole::PyramidLeaf) => self.pyramid_leaf_2d,
            (2, LayoutRole::OriginalDataset) => self.original_dataset_2d,
            (1, LayoutRole::PyramidLeaf) => self.pyramid_leaf_1d,
            (1, LayoutRole::OriginalDataset) => self.original_dataset_1d,
            _ => return None,
        };
        Some(m.max(1))
    }

    pub fn inner_divisor(&self, rank: usize) -> Option<usize> {
        match rank {
            2 => Some(self.inner_divisor_2d.max(1)),
            1 => Some(self.inner_divisor_1d.max(1)),
            _ => None,
        }
    }
}

/// Planned geometry of one array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLayout {
    pub chunk_shape: Vec<usize>,
    /// Present when the array is sharded; each entry is a multiple of the
    /// matching `chunk_shape` entry.
    pub shard_shape: Option<Vec<usize>>,
}

impl ChunkLayout {
    /// Shape of one stored object: the shard if sharded, else the chunk.
    pub fn outer_shape(&self) -> &[usize] {
        self.shard_shape.as_deref().unwrap_or(&self.chunk_shape)
    }
}

/// Plan the chunk and shard shape of an array of `shape`.
///
/// `chunk_candidate` is the chunking the producer would like; without one
/// (or with one of the wrong rank) the whole array is a single chunk.
pub fn plan_layout(
    shape: &[usize],
    chunk_candidate: Option<&[usize]>,
    role: LayoutRole,
    multipliers: &ShardMultipliers,
) -> ChunkLayout {
    let rank = shape.len();
    let Some(multiplier) = multipliers.multiplier(rank, role) else {
        log::debug!("rank {rank} arrays are not sharded, chunking by the array shape");
        return ChunkLayout {
            chunk_shape: shape.iter().map(|&dim| dim.max(1)).collect(),
            shard_shape: None,
        };
    };

    let candidate = match chunk_candidate {
        Some(chunks) if chunks.len() == rank => chunks,
        Some(chunks) => {
            log::warn!(
                "chunk shape {chunks:?} does not match the rank of {shape:?}, chunking by the array shape"
            );
            shape
        }
        None => shape,
    };

    let chunk_shape: Vec<usize> = candidate
        .iter()
        .zip(shape)
        .map(|(&chunk, &dim)| chunk.min(dim).max(1))
        .collect();
    let shard_shape = chunk_shape
        .iter()
        .zip(shape)
        .map(|(&chunk, &dim)| {
            let shard = chunk.saturating_mul(multiplier).min(dim);
            (shard / chunk).max(1) * chunk
        })
        .collect();

    ChunkLayout {
        chunk_shape,
        shard_shape: Some(shard_shape),
    }
}

/// Inner chunk shape for re-sharding an existing outer chunk of `outer`.
///
/// Each axis is divided by the rank's divisor (floor, minimum 1) and then
/// lowered to the nearest exact divisor of the outer extent, so inner
/// chunks tile the shard. Returns `None` for ranks that are not sharded,
/// and when an axis collapses to one-element inner chunks because its
/// extent has no divisor between 1 and the target (a prime extent).
pub fn inner_chunk_shape(outer: &[usize], multipliers: &ShardMultipliers) -> Option<Vec<usize>> {
    let divisor = multipliers.inner_divisor(outer.len())?;
    let mut inner = Vec::with_capacity(outer.len());
    for &dim in outer {
        let target = (dim / divisor).max(1);
        let chunk = (1..=target).rev().find(|c| dim % c == 0).unwrap_or(1);
        if chunk == 1 && target > 1 {
            log::warn!(
                "outer extent {dim} has no divisor near {target}, not sharding outer chunk {outer:?}"
            );
            return None;
        }
        inner.push(chunk);
    }
    Some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(shape: &[usize], chunks: Option<&[usize]>, role: LayoutRole) -> ChunkLayout {
        plan_layout(shape, chunks, role, &ShardMultipliers::default())
    }

    #[test]
    fn pyramid_shards_are_clamped_to_the_array() {
        let layout = plan(&[1024, 1024], Some(&[256, 256]), LayoutRole::PyramidLeaf);
        assert_eq!(layout.chunk_shape, vec![256, 256]);
        assert_eq!(layout.shard_shape, Some(vec![1024, 1024]));
    }

    #[test]
    fn one_dimensional_coordinates_stay_a_single_shard() {
        let layout = plan(&[1440], Some(&[1440]), LayoutRole::PyramidLeaf);
        assert_eq!(layout.chunk_shape, vec![1440]);
        assert_eq!(layout.shard_shape, Some(vec![1440]));
    }

    #[test]
    fn original_dataset_uses_smaller_shards() {
        let layout = plan(&[4096, 8192], Some(&[256, 256]), LayoutRole::OriginalDataset);
        assert_eq!(layout.shard_shape, Some(vec![1024, 1024]));
        let layout = plan(&[100_000], Some(&[100]), LayoutRole::OriginalDataset);
        assert_eq!(layout.shard_shape, Some(vec![1600]));
    }

    #[test]
    fn clamped_shards_round_down_to_whole_chunks() {
        let layout = plan(&[1000, 300], Some(&[256, 256]), LayoutRole::PyramidLeaf);
        assert_eq!(layout.chunk_shape, vec![256, 256]);
        assert_eq!(layout.shard_shape, Some(vec![768, 256]));
    }

    #[test]
    fn oversized_and_zero_chunks_are_clamped() {
        let layout = plan(&[10, 0], Some(&[64, 0]), LayoutRole::PyramidLeaf);
        assert_eq!(layout.chunk_shape, vec![10, 1]);
        assert_eq!(layout.shard_shape, Some(vec![10, 1]));
    }

    #[test]
    fn unsupported_ranks_are_not_sharded() {
        let layout = plan(&[4, 5, 6], Some(&[2, 2, 2]), LayoutRole::PyramidLeaf);
        assert_eq!(layout.chunk_shape, vec![4, 5, 6]);
        assert_eq!(layout.shard_shape, None);
        let layout = plan(&[], None, LayoutRole::OriginalDataset);
        assert!(layout.chunk_shape.is_empty());
        assert_eq!(layout.outer_shape(), &[] as &[usize]);
    }

    #[test]
    fn rank_mismatch_falls_back_to_the_shape() {
        testing_logger::setup();
        let layout = plan(&[720, 1440], Some(&[256]), LayoutRole::PyramidLeaf);
        assert_eq!(layout.chunk_shape, vec![720, 1440]);
        testing_logger::validate(|logs| {
            assert!(logs.iter().any(|l| l.level == log::Level::Warn));
        });
    }

    #[test]
    fn planned_layouts_hold_their_invariants() {
        let multipliers = ShardMultipliers::default();
        for shape in [vec![1], vec![7], vec![1440], vec![3, 5], vec![1024, 1000], vec![721, 1440]] {
            for chunk in [1usize, 3, 64, 256, 5000] {
                for role in [LayoutRole::PyramidLeaf, LayoutRole::OriginalDataset] {
                    let candidate = vec![chunk; shape.len()];
                    let layout = plan_layout(&shape, Some(&candidate), role, &multipliers);
                    assert_eq!(layout.chunk_shape.len(), shape.len());
                    let shard = layout.shard_shape.expect("ranks 1 and 2 are sharded");
                    for i in 0..shape.len() {
                        let c = layout.chunk_shape[i];
                        assert!(c >= 1);
                        assert!(c <= shape[i].max(1));
                        assert_eq!(shard[i] % c, 0);
                        assert!(shard[i] >= c);
                        assert!(shard[i] <= shape[i].max(c));
                    }
                }
            }
        }
    }

    #[test]
    fn inner_chunks_tile_the_outer_chunk() {
        let m = ShardMultipliers::default();
        assert_eq!(inner_chunk_shape(&[1024, 1024], &m), Some(vec![64, 64]));
        assert_eq!(inner_chunk_shape(&[1440], &m), Some(vec![5]));
        assert_eq!(inner_chunk_shape(&[100], &m), Some(vec![1]));
        assert_eq!(inner_chunk_shape(&[1000, 721], &m), Some(vec![50, 7]));
        assert_eq!(inner_chunk_shape(&[2, 3, 4], &m), None);
    }

    #[test]
    fn prime_extents_are_not_sharded() {
        testing_logger::setup();
        let m = ShardMultipliers::default();
        assert_eq!(inner_chunk_shape(&[1021, 1021], &m), None);
        assert_eq!(inner_chunk_shape(&[1024, 1021], &m), None);
        assert_eq!(inner_chunk_shape(&[1031], &m), None);
        // Small extents aim for one-element chunks anyway.
        assert_eq!(inner_chunk_shape(&[7, 13], &m), Some(vec![1, 1]));
        testing_logger::validate(|logs| {
            assert_eq!(logs.iter().filter(|l| l.level == log::Level::Warn).count(), 3);
        });
    }

    #[test]
    fn roles_parse_from_cli_spellings() {
        assert_eq!("pyramid-leaf".parse::<LayoutRole>(), Ok(LayoutRole::PyramidLeaf));
        assert_eq!("original_dataset".parse::<LayoutRole>(), Ok(LayoutRole::OriginalDataset));
        assert!("thumbnail".parse::<LayoutRole>().is_err());
    }
}
