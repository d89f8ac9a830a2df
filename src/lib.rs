//! Chunk/shard layout planning and codec migration for Zarr V3 stores.
//!
//! Arrays are written with geometry from [`plan_layout`]. A
//! [`MigrationOrchestrator`] later walks the store and rewrites every array
//! whose codec pipeline uses a disallowed compressor.

pub mod array;
pub mod codecs;
pub mod config;
pub mod error;
pub mod group;
pub mod hierarchy;
pub mod inspect;
pub mod layout;
pub mod metadata;
pub mod migrate;
pub mod orchestrator;
pub mod store;
pub mod types;
pub mod writer;

// Re-export key types at crate root for convenience.
pub use array::ZarrArray;
pub use codecs::Compression;
pub use config::MigrationConfig;
pub use error::{MigrationError, ZarrError, ZarrResult};
pub use group::ZarrGroup;
pub use hierarchy::{StoreNode, StoreWalker, WalkEntry, consolidate_metadata};
pub use inspect::{CodecLocation, Inspection, inspect_pipeline};
pub use layout::{ChunkLayout, LayoutRole, ShardMultipliers, inner_chunk_shape, plan_layout};
pub use metadata::{ArrayMetadata, GroupMetadata, NodeMetadata};
pub use migrate::{ArrayMigrator, MigrationRecord, WriteStrategy};
pub use orchestrator::{FailureKind, MigrationOrchestrator, MigrationSummary, SkipReason};
pub use store::{LocalBackend, ObjectStoreBackend, StorageBackend};
pub use types::{DataType, Endian, FillValue, ZarrValue};
pub use writer::{VariableSpec, write_variable};
