//! Clustering engines: reorder a full row stream by lexical keys, Z-order
//! keys or a secondary index's key order.

mod engines;
mod sorter;
mod table_io;
pub mod zorder;

use std::{
    fmt,
    path::{Path, PathBuf},
};

use thiserror::Error;

pub use self::{
    engines::{cluster, DataClustering, IndexClustering, LexicalClustering, ZOrderClustering},
    sorter::{SortKey, SorterOptions, TupleSorter},
    table_io::{PaxClusteringReader, PaxClusteringWriter},
};
use crate::{
    format::FormatError,
    fs::FsError,
    options::{ClusterType, OptionsError, RelOptions},
    partition::PartitionError,
    types::{Row, TupleDesc},
};

/// Clustering failures.
#[derive(Debug, Error)]
pub enum ClusteringError {
    /// Options that cannot drive a pass.
    #[error("invalid clustering options: {0}")]
    InvalidOptions(String),
    /// Rejected options.
    #[error(transparent)]
    Options(#[from] OptionsError),
    /// Codec failure while reading or spilling rows.
    #[error("sort format error: {0}")]
    Format(#[from] FormatError),
    /// Failure of the table reader or writer.
    #[error("partition error: {0}")]
    Partition(#[from] PartitionError),
    /// File system failure.
    #[error("sort fs error: {0}")]
    Fs(#[from] FsError),
}

/// Source of the rows to cluster.
pub trait ClusteringDataReader {
    /// Next row, `None` once the source is exhausted.
    fn next_tuple(&mut self) -> Result<Option<Row>, ClusteringError>;

    /// Release the source.
    fn close(&mut self) -> Result<(), ClusteringError>;
}

/// Destination of the clustered rows. Z-order clustering hands over rows that
/// carry the composite key as one extra trailing value.
pub trait ClusteringDataWriter {
    /// Append one row in clustered order.
    fn write_tuple(&mut self, row: &Row) -> Result<(), ClusteringError>;

    /// Flush and publish everything written.
    fn close(&mut self) -> Result<(), ClusteringError>;
}

/// Clustering engine selected by the options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterKind {
    /// Interleaved key of several columns.
    ZOrder,
    /// Key order of an index.
    Index,
    /// Plain multi-column sort.
    Lexical,
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClusterKind::ZOrder => "zorder",
            ClusterKind::Index => "index",
            ClusterKind::Lexical => "lexical",
        })
    }
}

/// Key order of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    /// Index name, used in log records.
    pub name: String,
    /// Key columns in index order.
    pub keys: Vec<SortKey>,
}

impl IndexDescriptor {
    /// Index over `keys` named `name`.
    pub fn new(name: impl Into<String>, keys: Vec<SortKey>) -> Self {
        Self {
            name: name.into(),
            keys,
        }
    }
}

/// Sort on a list of columns.
#[derive(Debug, Clone)]
pub struct LexicalOptions {
    /// Columns of the clustered rows.
    pub desc: TupleDesc,
    /// Sort keys, most significant first.
    pub keys: Vec<SortKey>,
    /// Memory budget of the sort in bytes.
    pub work_mem: usize,
    /// Where sorted runs spill, the system temp dir when `None`.
    pub spill_dir: Option<PathBuf>,
}

/// Sort on the interleaved key of several columns.
#[derive(Debug, Clone)]
pub struct ZOrderOptions {
    /// Columns of the clustered rows.
    pub desc: TupleDesc,
    /// Attribute indexes of the key columns, in key order.
    pub columns: Vec<usize>,
    /// Memory budget of the sort in bytes.
    pub work_mem: usize,
    /// Where sorted runs spill, the system temp dir when `None`.
    pub spill_dir: Option<PathBuf>,
}

/// Sort in the key order of an index.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Columns of the clustered rows.
    pub desc: TupleDesc,
    /// Index whose key order the rows follow.
    pub index: IndexDescriptor,
    /// Memory budget of the sort in bytes.
    pub work_mem: usize,
    /// Where sorted runs spill, the system temp dir when `None`.
    pub spill_dir: Option<PathBuf>,
}

/// Parameters of one clustering pass.
#[derive(Debug, Clone)]
pub enum ClusteringOptions {
    /// Z-order clustering.
    ZOrder(ZOrderOptions),
    /// Index clustering.
    Index(IndexOptions),
    /// Lexical clustering.
    Lexical(LexicalOptions),
}

impl ClusteringOptions {
    /// Lexical sort on `keys`.
    pub fn lexical(desc: TupleDesc, keys: Vec<SortKey>, work_mem: usize) -> Self {
        ClusteringOptions::Lexical(LexicalOptions {
            desc,
            keys,
            work_mem,
            spill_dir: None,
        })
    }

    /// Z-order on the attributes `columns`.
    pub fn zorder(desc: TupleDesc, columns: Vec<usize>, work_mem: usize) -> Self {
        ClusteringOptions::ZOrder(ZOrderOptions {
            desc,
            columns,
            work_mem,
            spill_dir: None,
        })
    }

    /// Clustering in the key order of `index`.
    pub fn index(desc: TupleDesc, index: IndexDescriptor, work_mem: usize) -> Self {
        ClusteringOptions::Index(IndexOptions {
            desc,
            index,
            work_mem,
            spill_dir: None,
        })
    }

    /// Options implied by a relation's `cluster_type` and `cluster_columns`,
    /// `None` when the relation is not clustered.
    pub fn from_rel_options(
        desc: &TupleDesc,
        rel_options: &RelOptions,
        work_mem: usize,
    ) -> Result<Option<Self>, ClusteringError> {
        let Some(cluster_type) = rel_options.cluster_type else {
            return Ok(None);
        };
        rel_options.validate(desc)?;
        let columns = rel_options.cluster_column_indexes(desc)?;
        Ok(Some(match cluster_type {
            ClusterType::ZOrder => Self::zorder(desc.clone(), columns, work_mem),
            ClusterType::Lexical => Self::lexical(
                desc.clone(),
                columns.into_iter().map(SortKey::asc).collect(),
                work_mem,
            ),
        }))
    }

    /// Engine the options select.
    pub fn kind(&self) -> ClusterKind {
        match self {
            ClusteringOptions::ZOrder(_) => ClusterKind::ZOrder,
            ClusteringOptions::Index(_) => ClusterKind::Index,
            ClusteringOptions::Lexical(_) => ClusterKind::Lexical,
        }
    }

    /// Columns of the clustered rows.
    pub fn desc(&self) -> &TupleDesc {
        match self {
            ClusteringOptions::ZOrder(o) => &o.desc,
            ClusteringOptions::Index(o) => &o.desc,
            ClusteringOptions::Lexical(o) => &o.desc,
        }
    }

    /// Memory budget of the sort in bytes.
    pub fn work_mem(&self) -> usize {
        match self {
            ClusteringOptions::ZOrder(o) => o.work_mem,
            ClusteringOptions::Index(o) => o.work_mem,
            ClusteringOptions::Lexical(o) => o.work_mem,
        }
    }

    /// Spill directory, if one was set.
    pub fn spill_dir(&self) -> Option<&Path> {
        match self {
            ClusteringOptions::ZOrder(o) => o.spill_dir.as_deref(),
            ClusteringOptions::Index(o) => o.spill_dir.as_deref(),
            ClusteringOptions::Lexical(o) => o.spill_dir.as_deref(),
        }
    }

    /// Directory under which sort runs are spilled.
    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = Some(dir.into());
        match &mut self {
            ClusteringOptions::ZOrder(o) => o.spill_dir = dir,
            ClusteringOptions::Index(o) => o.spill_dir = dir,
            ClusteringOptions::Lexical(o) => o.spill_dir = dir,
        }
        self
    }
}

/// Outcome of one clustering pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusteringStats {
    /// Rows read from the source.
    pub rows: u64,
    /// Sorted runs spilled to disk.
    pub spilled_runs: usize,
}
