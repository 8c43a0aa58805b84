//! Physical file primitives and path derivation.
//!
//! The engine only needs create/append/read/remove over whole files; backends
//! must report a missing file as [`FsError::NotFound`] rather than a generic
//! I/O failure.

mod local;

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use bytes::Bytes;
use thiserror::Error;

pub use self::local::LocalFs;
use crate::id::BlockId;

/// File system failures.
#[derive(Debug, Error)]
pub enum FsError {
    /// The file does not exist.
    #[error("file not found: {}", path.display())]
    NotFound {
        /// Missing file.
        path: PathBuf,
    },
    /// Any other I/O failure.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// File the operation touched.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl FsError {
    /// Classify an [`io::Error`] raised while touching `path`.
    pub fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            FsError::NotFound { path }
        } else {
            FsError::Io { path, source }
        }
    }

    /// Whether the error is [`FsError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound { .. })
    }
}

/// Sequential writer over one file.
pub trait FileWrite: Write + Send {
    /// Flush buffered bytes and make them durable.
    fn sync(&mut self) -> Result<(), FsError>;
}

/// File system backend used for data files and the catalog journal.
pub trait FileSystem: Send + Sync {
    /// Create (or truncate) `path` for writing.
    fn create(&self, path: &Path) -> Result<Box<dyn FileWrite>, FsError>;

    /// Open `path` for appending, creating it when missing.
    fn append(&self, path: &Path) -> Result<Box<dyn FileWrite>, FsError>;

    /// Read the whole content of `path`.
    fn read(&self, path: &Path) -> Result<Bytes, FsError>;

    /// Delete `path`.
    fn remove(&self, path: &Path) -> Result<(), FsError>;

    /// Whether `path` exists.
    fn exists(&self, path: &Path) -> Result<bool, FsError>;

    /// Create `path` and every missing parent.
    fn create_dir_all(&self, path: &Path) -> Result<(), FsError>;

    /// Size of `path` in bytes.
    fn len(&self, path: &Path) -> Result<u64, FsError>;

    /// Truncate `path` to `len` bytes.
    fn truncate(&self, path: &Path, len: u64) -> Result<(), FsError>;
}

/// Directory holding every micro-partition of `rel_oid`.
pub fn relation_dir(root: &Path, rel_oid: u32) -> PathBuf {
    root.join(format!("{rel_oid}_pax"))
}

/// Deterministic path of the micro-partition `block_id` of `rel_oid`.
pub fn partition_path(root: &Path, rel_oid: u32, block_id: &BlockId) -> PathBuf {
    relation_dir(root, rel_oid).join(block_id.to_string())
}
