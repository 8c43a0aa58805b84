//! Errors surfaced by the statement-level entry points.

use crate::{
    catalog::CatalogError, clustering::ClusteringError, format::FormatError, fs::FsError,
    itemptr::ItemPointer, options::OptionsError, partition::PartitionError,
};

/// Statement-level error returned by the access entry points.
#[derive(Debug, thiserror::Error)]
pub enum PaxError {
    /// DML call for a relation without an initialized DML state.
    #[error("no dml state for relation {0}")]
    DmlStateMissing(u32),
    /// Row pointer that does not resolve to a live block.
    #[error("invalid item pointer {0}")]
    InvalidItemPointer(ItemPointer),
    /// Write after the statement writer was closed.
    #[error("writer is closed")]
    WriterClosed,
    /// No relation with this oid was created.
    #[error("relation {0} is not registered")]
    UnknownRelation(u32),
    /// A relation with this oid was already created.
    #[error("relation {0} is already registered")]
    RelationExists(u32),
    /// Rejected relation options.
    #[error("invalid options: {0}")]
    Options(#[from] OptionsError),
    /// Micro-partition codec failure.
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    /// Micro-partition writer or reader failure.
    #[error("partition error: {0}")]
    Partition(#[from] PartitionError),
    /// Catalog failure.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    /// Clustering failure.
    #[error("clustering error: {0}")]
    Clustering(#[from] ClusteringError),
    /// File system failure.
    #[error("fs error: {0}")]
    Fs(#[from] FsError),
}
