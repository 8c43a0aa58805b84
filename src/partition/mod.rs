//! Micro-partition writers and readers layered over the file codec.

mod reader;
mod split;
mod stats;
mod writer;

use std::{fmt, path::PathBuf};

use thiserror::Error;

pub use self::{
    reader::{MicroPartitionReader, TableReader},
    split::{DefaultSplitStrategy, NeverSplit, SplitDecision, SplitReason, SplitStats, SplitStrategy},
    stats::{ColumnStats, PartitionStats},
    writer::{
        MicroPartitionWriter, PartitionConfig, RowLocation, TableWriter, WriteSummaryCallback,
    },
};
pub(crate) use self::writer::remove_if_exists;
use crate::{catalog::CatalogError, format::FormatError, fs::FsError, id::BlockId};

/// Produced once per closed micro-partition; the unit of catalog registration.
#[derive(Clone, PartialEq)]
pub struct WriteSummary {
    /// Path of the data file.
    pub file_name: PathBuf,
    /// Identifier of the micro-partition.
    pub block_id: BlockId,
    /// On-disk size in bytes.
    pub file_size: u64,
    /// Rows written.
    pub num_tuples: u64,
    /// Relation the partition belongs to.
    pub rel_oid: u32,
    /// Per-column statistics.
    pub stats: PartitionStats,
}

impl fmt::Debug for WriteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSummary")
            .field("block_id", &self.block_id)
            .field("rel_oid", &self.rel_oid)
            .field("num_tuples", &self.num_tuples)
            .field("file_size", &self.file_size)
            .finish()
    }
}

/// Micro-partition writer and reader failures.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// Attempted to write with no open micro-partition.
    #[error("micro-partition writer is closed")]
    WriterClosed,
    /// `create` called while a micro-partition is still open.
    #[error("micro-partition writer already has an open file")]
    AlreadyOpen,
    /// The tuple number does not fit the row pointer.
    #[error("tuple number {0} is past the addressable range")]
    TupleOverflow(u64),
    /// Micro-partition codec failure.
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    /// Catalog registration failure.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    /// File system failure.
    #[error("filesystem error: {0}")]
    Fs(#[from] FsError),
}
