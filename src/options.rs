//! Engine-wide storage options and typed per-relation options.

use std::{fmt, path::PathBuf, str::FromStr};

use thiserror::Error;

use crate::{
    clustering::zorder::{is_zorder_type, MAX_ZORDER_KEYS},
    itemptr::MAX_TUPLE_NUMBER,
    types::TupleDesc,
};

/// Rows accumulated in memory before a batch is handed to the column writer.
pub const DEFAULT_TARGET_BATCH_ROW_COUNT: usize = 16 * 1024;
/// In-progress bytes after which buffered batches are flushed as a stripe.
pub const DEFAULT_TARGET_STRIPE_BYTE_SIZE: usize = 8 * 1024 * 1024;
/// Row threshold of the default split strategy.
pub const DEFAULT_SPLIT_MAX_TUPLES: usize = 100_000;
/// Byte threshold of the default split strategy.
pub const DEFAULT_SPLIT_MAX_BYTES: usize = 64 * 1024 * 1024;
/// Memory budget of one clustering sort.
pub const DEFAULT_WORK_MEM: usize = 64 * 1024 * 1024;

/// Lowest accepted compress level.
pub const MIN_COMPRESS_LEVEL: i32 = 0;
/// Highest accepted compress level.
pub const MAX_COMPRESS_LEVEL: i32 = 19;
/// Highest level the gzip codec accepts.
pub const MAX_ZLIB_COMPRESS_LEVEL: i32 = 10;

/// Rejected storage or relation options.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    /// The storage format name is unknown.
    #[error("unsupported storage format: '{0}'")]
    UnsupportedStorageFormat(String),
    /// The compress type name is unknown.
    #[error("unsupported compress type: '{0}'")]
    UnsupportedCompressType(String),
    /// A level was given for a type that takes none.
    #[error("compresslevel={0} should setting is not work for current encoding")]
    CompressLevelNotAllowed(i32),
    /// The level is outside the range of the compress type.
    #[error("compresslevel={level} out of range [0, {max}]")]
    CompressLevelOutOfRange {
        /// Requested level.
        level: i32,
        /// Highest level of the compress type.
        max: i32,
    },
    /// The cluster type name is unknown.
    #[error("unsupported cluster type: '{0}', only support zorder and lexical")]
    UnsupportedClusterType(String),
    /// No column has this name.
    #[error("column '{0}' does not exist")]
    UnknownColumn(String),
    /// The column type has no Z-order encoding.
    #[error("the type of column {0} does not support zorder cluster")]
    ZOrderUnsupportedType(String),
    /// More Z-order key columns than the key can interleave.
    #[error("zorder cluster supports at most 32 columns, got {0}")]
    TooManyZOrderColumns(usize),
    /// A cluster type was set without key columns.
    #[error("cluster_type is set but cluster_columns is empty")]
    MissingClusterColumns,
}

/// Storage options shared by every relation of one engine instance.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub(crate) path: PathBuf,
    pub(crate) target_batch_row_count: usize,
    pub(crate) target_stripe_byte_size: usize,
    pub(crate) split_max_tuples: usize,
    pub(crate) split_max_bytes: usize,
    pub(crate) work_mem: usize,
    pub(crate) use_journal: bool,
}

impl<P> From<P> for StorageOptions
where
    P: Into<PathBuf>,
{
    fn from(path: P) -> Self {
        StorageOptions {
            path: path.into(),
            target_batch_row_count: DEFAULT_TARGET_BATCH_ROW_COUNT,
            target_stripe_byte_size: DEFAULT_TARGET_STRIPE_BYTE_SIZE,
            split_max_tuples: DEFAULT_SPLIT_MAX_TUPLES,
            split_max_bytes: DEFAULT_SPLIT_MAX_BYTES,
            work_mem: DEFAULT_WORK_MEM,
            use_journal: true,
        }
    }
}

impl StorageOptions {
    /// Root directory of the store.
    pub fn path(self, path: impl Into<PathBuf>) -> Self {
        StorageOptions {
            path: path.into(),
            ..self
        }
    }

    /// Rows per row group.
    pub fn target_batch_row_count(self, target_batch_row_count: usize) -> Self {
        StorageOptions {
            target_batch_row_count: target_batch_row_count.max(1),
            ..self
        }
    }

    /// Buffered bytes that force a row group out.
    pub fn target_stripe_byte_size(self, target_stripe_byte_size: usize) -> Self {
        StorageOptions {
            target_stripe_byte_size,
            ..self
        }
    }

    /// Row threshold for partition rollover. Clamped to the addressable tuple
    /// range of a row pointer.
    pub fn split_max_tuples(self, split_max_tuples: usize) -> Self {
        StorageOptions {
            split_max_tuples: split_max_tuples.clamp(1, MAX_TUPLE_NUMBER as usize + 1),
            ..self
        }
    }

    /// Estimated size that rolls a micro-partition over.
    pub fn split_max_bytes(self, split_max_bytes: usize) -> Self {
        StorageOptions {
            split_max_bytes,
            ..self
        }
    }

    /// Memory budget of a clustering sort.
    pub fn work_mem(self, work_mem: usize) -> Self {
        StorageOptions { work_mem, ..self }
    }

    /// Persist catalog changes to a journal under the storage root.
    pub fn use_journal(self, use_journal: bool) -> Self {
        StorageOptions {
            use_journal,
            ..self
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &PathBuf {
        &self.path
    }

    pub(crate) fn journal_path(&self) -> PathBuf {
        self.path.join("pax_catalog.journal")
    }

    pub(crate) fn spill_dir(&self) -> PathBuf {
        self.path.join("pgsql_tmp")
    }
}

/// Physical storage format of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageFormat {
    /// Row-at-a-time columnar format.
    #[default]
    Porc,
    /// Vectorized columnar format.
    PorcVec,
}

impl FromStr for StorageFormat {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "porc" | "orc" => Ok(StorageFormat::Porc),
            "porc_vec" => Ok(StorageFormat::PorcVec),
            other => Err(OptionsError::UnsupportedStorageFormat(other.to_string())),
        }
    }
}

/// Column encoding or compression applied by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressType {
    /// No compression.
    #[default]
    None,
    /// Run-length encoding.
    Rle,
    /// Delta encoding.
    Delta,
    /// Dictionary encoding.
    Dictionary,
    /// Zstandard compression.
    Zstd,
    /// Gzip compression.
    Zlib,
}

impl CompressType {
    /// Whether a compress level is meaningful for this type.
    pub fn takes_level(&self) -> bool {
        matches!(self, CompressType::Zstd | CompressType::Zlib)
    }
}

impl FromStr for CompressType {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CompressType::None),
            "rle" => Ok(CompressType::Rle),
            "delta" => Ok(CompressType::Delta),
            "dict" => Ok(CompressType::Dictionary),
            "zstd" => Ok(CompressType::Zstd),
            "zlib" => Ok(CompressType::Zlib),
            other => Err(OptionsError::UnsupportedCompressType(other.to_string())),
        }
    }
}

impl fmt::Display for CompressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressType::None => "none",
            CompressType::Rle => "rle",
            CompressType::Delta => "delta",
            CompressType::Dictionary => "dict",
            CompressType::Zstd => "zstd",
            CompressType::Zlib => "zlib",
        };
        f.write_str(name)
    }
}

/// Clustering applied by `cluster_table` when options do not say otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterType {
    /// Interleaved key of several columns.
    ZOrder,
    /// Plain multi-column sort.
    Lexical,
}

impl FromStr for ClusterType {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zorder" => Ok(ClusterType::ZOrder),
            "lexical" => Ok(ClusterType::Lexical),
            other => Err(OptionsError::UnsupportedClusterType(other.to_string())),
        }
    }
}

/// Already-parsed options of one relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelOptions {
    /// Physical storage format.
    pub storage_format: StorageFormat,
    /// Compression or encoding of every column.
    pub compress_type: CompressType,
    /// `0` picks the codec default.
    pub compress_level: i32,
    /// Default clustering of `cluster_table`.
    pub cluster_type: Option<ClusterType>,
    /// Key columns of the default clustering.
    pub cluster_columns: Vec<String>,
    /// Columns that get min/max statistics.
    pub minmax_columns: Vec<String>,
    /// Columns that get bloom filters.
    pub bloomfilter_columns: Vec<String>,
    /// Workers a parallel scan may use.
    pub parallel_workers: Option<u32>,
}

impl RelOptions {
    /// Set the storage format.
    pub fn storage_format(self, storage_format: StorageFormat) -> Self {
        RelOptions {
            storage_format,
            ..self
        }
    }

    /// Set the compress type and level.
    pub fn compress(self, compress_type: CompressType, compress_level: i32) -> Self {
        RelOptions {
            compress_type,
            compress_level,
            ..self
        }
    }

    /// Set the default clustering and its key columns.
    pub fn cluster(self, cluster_type: ClusterType, columns: &[&str]) -> Self {
        RelOptions {
            cluster_type: Some(cluster_type),
            cluster_columns: columns.iter().map(|c| c.to_string()).collect(),
            ..self
        }
    }

    /// Set the min/max statistics columns.
    pub fn minmax_columns(self, columns: &[&str]) -> Self {
        RelOptions {
            minmax_columns: columns.iter().map(|c| c.to_string()).collect(),
            ..self
        }
    }

    /// Set the bloom filter columns.
    pub fn bloomfilter_columns(self, columns: &[&str]) -> Self {
        RelOptions {
            bloomfilter_columns: columns.iter().map(|c| c.to_string()).collect(),
            ..self
        }
    }

    /// Set the parallel scan worker count.
    pub fn parallel_workers(self, parallel_workers: u32) -> Self {
        RelOptions {
            parallel_workers: Some(parallel_workers),
            ..self
        }
    }

    /// Check the options against the relation's columns.
    pub fn validate(&self, desc: &TupleDesc) -> Result<(), OptionsError> {
        if !self.compress_type.takes_level() && self.compress_level != 0 {
            return Err(OptionsError::CompressLevelNotAllowed(self.compress_level));
        }
        let max = match self.compress_type {
            CompressType::Zlib => MAX_ZLIB_COMPRESS_LEVEL,
            _ => MAX_COMPRESS_LEVEL,
        };
        if !(MIN_COMPRESS_LEVEL..=max).contains(&self.compress_level) {
            return Err(OptionsError::CompressLevelOutOfRange {
                level: self.compress_level,
                max,
            });
        }
        for name in self.minmax_columns.iter().chain(&self.bloomfilter_columns) {
            resolve_column(desc, name)?;
        }
        for name in &self.cluster_columns {
            let index = resolve_column(desc, name)?;
            if self.cluster_type == Some(ClusterType::ZOrder) {
                let ty = desc.attrs()[index].ty;
                if !is_zorder_type(ty) {
                    return Err(OptionsError::ZOrderUnsupportedType(name.clone()));
                }
            }
        }
        if self.cluster_type == Some(ClusterType::ZOrder)
            && self.cluster_columns.len() > MAX_ZORDER_KEYS
        {
            return Err(OptionsError::TooManyZOrderColumns(
                self.cluster_columns.len(),
            ));
        }
        if self.cluster_type.is_some() && self.cluster_columns.is_empty() {
            return Err(OptionsError::MissingClusterColumns);
        }
        Ok(())
    }

    /// Column indexes of `minmax_columns`.
    pub fn minmax_column_indexes(&self, desc: &TupleDesc) -> Result<Vec<usize>, OptionsError> {
        resolve_columns(desc, &self.minmax_columns)
    }

    /// Attribute indexes of the bloom filter columns.
    pub fn bloomfilter_column_indexes(&self, desc: &TupleDesc) -> Result<Vec<usize>, OptionsError> {
        resolve_columns(desc, &self.bloomfilter_columns)
    }

    /// Column indexes of `cluster_columns`.
    pub fn cluster_column_indexes(&self, desc: &TupleDesc) -> Result<Vec<usize>, OptionsError> {
        resolve_columns(desc, &self.cluster_columns)
    }
}

fn resolve_column(desc: &TupleDesc, name: &str) -> Result<usize, OptionsError> {
    desc.column_index(name)
        .ok_or_else(|| OptionsError::UnknownColumn(name.to_string()))
}

fn resolve_columns(desc: &TupleDesc, names: &[String]) -> Result<Vec<usize>, OptionsError> {
    let mut indexes = names
        .iter()
        .map(|name| resolve_column(desc, name))
        .collect::<Result<Vec<_>, _>>()?;
    indexes.dedup();
    Ok(indexes)
}
