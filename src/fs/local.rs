use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use bytes::Bytes;

use super::{FileSystem, FileWrite, FsError};

/// [`FileSystem`] over the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

struct LocalFile {
    path: PathBuf,
    inner: BufWriter<File>,
}

impl Write for LocalFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl FileWrite for LocalFile {
    fn sync(&mut self) -> Result<(), FsError> {
        self.inner
            .flush()
            .map_err(|e| FsError::from_io(&self.path, e))?;
        self.inner
            .get_ref()
            .sync_data()
            .map_err(|e| FsError::from_io(&self.path, e))
    }
}

impl LocalFs {
    fn open_with(&self, path: &Path, options: &OpenOptions) -> Result<Box<dyn FileWrite>, FsError> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }
        let file = options
            .open(path)
            .map_err(|e| FsError::from_io(path, e))?;
        Ok(Box::new(LocalFile {
            path: path.to_path_buf(),
            inner: BufWriter::new(file),
        }))
    }
}

impl FileSystem for LocalFs {
    fn create(&self, path: &Path) -> Result<Box<dyn FileWrite>, FsError> {
        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(true);
        self.open_with(path, &options)
    }

    fn append(&self, path: &Path) -> Result<Box<dyn FileWrite>, FsError> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        self.open_with(path, &options)
    }

    fn read(&self, path: &Path) -> Result<Bytes, FsError> {
        fs::read(path)
            .map(Bytes::from)
            .map_err(|e| FsError::from_io(path, e))
    }

    fn remove(&self, path: &Path) -> Result<(), FsError> {
        fs::remove_file(path).map_err(|e| FsError::from_io(path, e))
    }

    fn exists(&self, path: &Path) -> Result<bool, FsError> {
        path.try_exists().map_err(|e| FsError::from_io(path, e))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        fs::create_dir_all(path).map_err(|e| FsError::from_io(path, e))
    }

    fn len(&self, path: &Path) -> Result<u64, FsError> {
        fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| FsError::from_io(path, e))
    }

    fn truncate(&self, path: &Path, len: u64) -> Result<(), FsError> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| FsError::from_io(path, e))?;
        file.set_len(len).map_err(|e| FsError::from_io(path, e))
    }
}
