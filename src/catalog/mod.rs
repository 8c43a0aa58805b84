//! Catalog collaborator: registration of closed micro-partitions, snapshot
//! scans over the live set, and the block number mapping used by row
//! pointers.

mod aux_table;
mod block_map;
mod journal;
mod table_metadata;

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::{
    aux_table::AuxCatalog,
    block_map::BlockMapManager,
    table_metadata::{MetadataIterator, TableMetadata},
};
use crate::{fs::FsError, id::BlockId, partition::PartitionStats, partition::WriteSummary};

/// Catalog failures.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Journal or record content is invalid.
    #[error("catalog corrupt: {0}")]
    Corrupt(String),
    /// A publish retires a block that is not live.
    #[error("relation {rel_oid} has no live micro-partition {block_id}")]
    UnknownBlock {
        /// Relation the publish was for.
        rel_oid: u32,
        /// Block that is not live.
        block_id: BlockId,
    },
    /// Every block number of the relation is taken.
    #[error("block number space of relation {0} is exhausted")]
    BlockMapFull(u32),
    /// A publish record failed to encode.
    #[error("catalog record codec: {0}")]
    Codec(#[from] bincode::Error),
    /// A failed journal write could not be rolled back.
    #[error("catalog journal {} is unusable after a failed write", path.display())]
    JournalPoisoned {
        /// Journal file.
        path: PathBuf,
    },
    /// The journal file could not be accessed.
    #[error("catalog fs error: {0}")]
    Fs(#[from] FsError),
}

/// Catalog read point. Every publish advances it by one.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(u64);

impl Snapshot {
    /// Sees nothing.
    pub const MIN: Self = Self(0);
    /// Sees everything ever published.
    pub const MAX: Self = Self(u64::MAX);

    /// Snapshot at the raw clock value `raw`.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw clock value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The snapshot one publish later.
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u64> for Snapshot {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Snapshot").field(&self.0).finish()
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read model of one live micro-partition.
#[derive(Clone, Debug, PartialEq)]
pub struct MicroPartitionMetadata {
    /// Identifier of the micro-partition.
    pub micro_partition_id: BlockId,
    /// Path of the data file.
    pub file_name: PathBuf,
    /// Rows stored in the file.
    pub tuple_count: u64,
    /// On-disk size in bytes.
    pub file_size: u64,
    /// Per-column statistics recorded at close.
    pub stats: PartitionStats,
}

impl From<&WriteSummary> for MicroPartitionMetadata {
    fn from(summary: &WriteSummary) -> Self {
        Self {
            micro_partition_id: summary.block_id,
            file_name: summary.file_name.clone(),
            tuple_count: summary.num_tuples,
            file_size: summary.file_size,
            stats: summary.stats.clone(),
        }
    }
}

/// Registration and snapshot scans of micro-partitions.
///
/// Registration is the publication point: a micro-partition becomes visible
/// to scans taken at or after the snapshot returned by the call that
/// registered it.
pub trait Catalog: Send + Sync {
    /// Register one closed micro-partition. Registering a block id that is
    /// already live is a no-op.
    fn register(&self, summary: &WriteSummary) -> Result<Snapshot, CatalogError> {
        self.publish(summary.rel_oid, std::slice::from_ref(summary), &[])
    }

    /// Atomically add `added` and retire `removed` for `rel_oid`. Either every
    /// change becomes visible at the returned snapshot or none does.
    fn publish(
        &self,
        rel_oid: u32,
        added: &[WriteSummary],
        removed: &[BlockId],
    ) -> Result<Snapshot, CatalogError>;

    /// Live micro-partitions of `rel_oid` under `snapshot`, in registration
    /// order.
    fn scan(
        &self,
        rel_oid: u32,
        snapshot: Snapshot,
    ) -> Result<Vec<MicroPartitionMetadata>, CatalogError>;

    /// Latest published snapshot.
    fn snapshot(&self) -> Snapshot;
}
