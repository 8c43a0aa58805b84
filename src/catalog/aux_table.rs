use std::{
    collections::HashMap,
    fmt,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use log::Level;

use super::{
    journal::{self, EntryRecord, PublishRecord},
    Catalog, CatalogError, MicroPartitionMetadata, Snapshot,
};
use crate::{
    fs::{FileSystem, FileWrite, FsError},
    id::BlockId,
    logging::pax_log,
    partition::WriteSummary,
};

#[derive(Debug, Clone)]
struct AuxEntry {
    record: EntryRecord,
    created_at: Snapshot,
    removed_at: Option<Snapshot>,
}

impl AuxEntry {
    fn visible_at(&self, snapshot: Snapshot) -> bool {
        self.created_at <= snapshot && self.removed_at.map_or(true, |r| r > snapshot)
    }

    fn is_live(&self) -> bool {
        self.removed_at.is_none()
    }

    fn metadata(&self) -> MicroPartitionMetadata {
        MicroPartitionMetadata {
            micro_partition_id: self.record.block_id,
            file_name: self.record.file_name.clone(),
            tuple_count: self.record.tuple_count,
            file_size: self.record.file_size,
            stats: self.record.stats.clone(),
        }
    }
}

/// Append handle on the journal file. `len` is the length of the durable
/// frame prefix; a failed append is cut back to it before anything else is
/// written.
struct Journal {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    writer: Option<Box<dyn FileWrite>>,
    len: u64,
}

impl Journal {
    fn append(&mut self, frame: &[u8]) -> Result<(), CatalogError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(CatalogError::JournalPoisoned {
                path: self.path.clone(),
            });
        };
        let written = writer
            .write_all(frame)
            .map_err(|err| FsError::from_io(&self.path, err))
            .and_then(|()| writer.sync());
        match written {
            Ok(()) => {
                self.len += frame.len() as u64;
                Ok(())
            }
            Err(err) => {
                self.rollback();
                Err(err.into())
            }
        }
    }

    /// Drop the failed handle, cut the file back to the last complete frame
    /// and reopen it. On failure the journal stays closed and every later
    /// append errors.
    fn rollback(&mut self) {
        // buffered bytes may still be flushed here; the truncate below
        // discards them
        drop(self.writer.take());
        let reopened = self
            .fs
            .truncate(&self.path, self.len)
            .and_then(|()| self.fs.append(&self.path));
        match reopened {
            Ok(writer) => {
                pax_log!(
                    Level::Warn,
                    "catalog_journal_rollback",
                    "path={} len={}",
                    self.path.display(),
                    self.len
                );
                self.writer = Some(writer);
            }
            Err(err) => pax_log!(
                Level::Error,
                "catalog_journal_poisoned",
                "path={} len={} error={}",
                self.path.display(),
                self.len,
                err
            ),
        }
    }
}

#[derive(Default)]
struct AuxState {
    relations: HashMap<u32, Vec<AuxEntry>>,
    clock: Snapshot,
    journal: Option<Journal>,
}

impl AuxState {
    /// Check a publish against the live set and drop re-registrations of
    /// already live blocks.
    fn prepare(
        &self,
        rel_oid: u32,
        added: &[WriteSummary],
        removed: &[BlockId],
    ) -> Result<Vec<EntryRecord>, CatalogError> {
        let entries = self.relations.get(&rel_oid);
        let is_live = |block_id: &BlockId| {
            entries.map_or(false, |entries| {
                entries
                    .iter()
                    .any(|e| e.is_live() && e.record.block_id == *block_id)
            })
        };
        if let Some(block_id) = removed.iter().find(|b| !is_live(b)) {
            return Err(CatalogError::UnknownBlock {
                rel_oid,
                block_id: *block_id,
            });
        }
        let mut records: Vec<EntryRecord> = Vec::with_capacity(added.len());
        for summary in added {
            if summary.rel_oid != rel_oid {
                return Err(CatalogError::Corrupt(format!(
                    "micro-partition {} belongs to relation {}, not {}",
                    summary.block_id, summary.rel_oid, rel_oid
                )));
            }
            let duplicate = is_live(&summary.block_id)
                || records.iter().any(|r| r.block_id == summary.block_id);
            if !duplicate {
                records.push(EntryRecord {
                    block_id: summary.block_id,
                    file_name: summary.file_name.clone(),
                    tuple_count: summary.num_tuples,
                    file_size: summary.file_size,
                    stats: summary.stats.clone(),
                });
            }
        }
        Ok(records)
    }

    fn apply(&mut self, record: PublishRecord) {
        let entries = self.relations.entry(record.rel_oid).or_default();
        for block_id in &record.removed {
            if let Some(entry) = entries
                .iter_mut()
                .find(|e| e.is_live() && e.record.block_id == *block_id)
            {
                entry.removed_at = Some(record.snapshot);
            }
        }
        entries.extend(record.added.into_iter().map(|record_entry| AuxEntry {
            record: record_entry,
            created_at: record.snapshot,
            removed_at: None,
        }));
        self.clock = self.clock.max(record.snapshot);
    }
}

/// Per-relation auxiliary table of micro-partitions, optionally backed by a
/// checksummed journal file.
pub struct AuxCatalog {
    state: Mutex<AuxState>,
    journal_path: Option<PathBuf>,
}

impl AuxCatalog {
    /// Catalog kept in memory only.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(AuxState::default()),
            journal_path: None,
        }
    }

    /// Open the catalog journaled at `path`, replaying every complete frame.
    /// A torn or corrupt tail is cut off before new frames are appended.
    pub fn open(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs.create_dir_all(parent)?;
        }
        let mut state = AuxState::default();
        let mut len = 0;
        let image = match fs.read(&path) {
            Ok(image) => Some(image),
            Err(FsError::NotFound { .. }) => None,
            Err(err) => return Err(err.into()),
        };
        if let Some(image) = image {
            let replay = journal::replay(&image);
            let frames = replay.records.len();
            for record in replay.records {
                state.apply(record);
            }
            if replay.valid_len < image.len() as u64 {
                pax_log!(
                    Level::Warn,
                    "catalog_recovery_truncate",
                    "path={} valid_len={} file_len={}",
                    path.display(),
                    replay.valid_len,
                    image.len()
                );
                fs.truncate(&path, replay.valid_len)?;
            }
            len = replay.valid_len;
            pax_log!(
                Level::Info,
                "catalog_recovery",
                "path={} frames={} snapshot={}",
                path.display(),
                frames,
                state.clock
            );
        }
        state.journal = Some(Journal {
            writer: Some(fs.append(&path)?),
            fs,
            path: path.clone(),
            len,
        });
        Ok(Self {
            state: Mutex::new(state),
            journal_path: Some(path),
        })
    }

    /// Journal file, `None` for an in-memory catalog.
    pub fn journal_path(&self) -> Option<&Path> {
        self.journal_path.as_deref()
    }

    /// Every relation that has ever had a micro-partition registered.
    pub fn relations(&self) -> Vec<u32> {
        let state = self.state.lock().expect("catalog state poisoned");
        let mut relations: Vec<u32> = state.relations.keys().copied().collect();
        relations.sort_unstable();
        relations
    }
}

impl Catalog for AuxCatalog {
    fn publish(
        &self,
        rel_oid: u32,
        added: &[WriteSummary],
        removed: &[BlockId],
    ) -> Result<Snapshot, CatalogError> {
        let mut state = self.state.lock().expect("catalog state poisoned");
        let added = state.prepare(rel_oid, added, removed)?;
        let snapshot = state.clock.next();
        let record = PublishRecord {
            snapshot,
            rel_oid,
            added,
            removed: removed.to_vec(),
        };
        if let Some(journal) = state.journal.as_mut() {
            journal.append(&record.encode_frame()?)?;
        }
        pax_log!(
            Level::Debug,
            "catalog_publish",
            "rel_oid={} snapshot={} added={} removed={}",
            rel_oid,
            snapshot,
            record.added.len(),
            record.removed.len()
        );
        state.apply(record);
        Ok(snapshot)
    }

    fn scan(
        &self,
        rel_oid: u32,
        snapshot: Snapshot,
    ) -> Result<Vec<MicroPartitionMetadata>, CatalogError> {
        let state = self.state.lock().expect("catalog state poisoned");
        Ok(state
            .relations
            .get(&rel_oid)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.visible_at(snapshot))
                    .map(AuxEntry::metadata)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn snapshot(&self) -> Snapshot {
        self.state.lock().expect("catalog state poisoned").clock
    }
}

impl Default for AuxCatalog {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for AuxCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuxCatalog")
            .field("journal_path", &self.journal_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicBool, Ordering},
    };

    use bytes::Bytes;
    use tempfile::TempDir;

    use super::*;
    use crate::{fs::LocalFs, partition::PartitionStats};

    /// Local disk whose append handles can be told to tear the next write
    /// in half, and whose truncate can be made to fail.
    #[derive(Default)]
    struct FlakyFs {
        tear_next_write: Arc<AtomicBool>,
        fail_truncate: AtomicBool,
    }

    struct FlakyFile {
        inner: Box<dyn FileWrite>,
        tear_next_write: Arc<AtomicBool>,
    }

    impl Write for FlakyFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.tear_next_write.swap(false, Ordering::SeqCst) {
                self.inner.write_all(&buf[..buf.len() / 2])?;
                self.inner.flush()?;
                return Err(io::Error::new(io::ErrorKind::Other, "torn write"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl FileWrite for FlakyFile {
        fn sync(&mut self) -> Result<(), FsError> {
            self.inner.sync()
        }
    }

    impl FileSystem for FlakyFs {
        fn create(&self, path: &Path) -> Result<Box<dyn FileWrite>, FsError> {
            LocalFs.create(path)
        }

        fn append(&self, path: &Path) -> Result<Box<dyn FileWrite>, FsError> {
            Ok(Box::new(FlakyFile {
                inner: LocalFs.append(path)?,
                tear_next_write: self.tear_next_write.clone(),
            }))
        }

        fn read(&self, path: &Path) -> Result<Bytes, FsError> {
            LocalFs.read(path)
        }

        fn remove(&self, path: &Path) -> Result<(), FsError> {
            LocalFs.remove(path)
        }

        fn exists(&self, path: &Path) -> Result<bool, FsError> {
            LocalFs.exists(path)
        }

        fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
            LocalFs.create_dir_all(path)
        }

        fn len(&self, path: &Path) -> Result<u64, FsError> {
            LocalFs.len(path)
        }

        fn truncate(&self, path: &Path, len: u64) -> Result<(), FsError> {
            if self.fail_truncate.load(Ordering::SeqCst) {
                return Err(FsError::from_io(
                    path,
                    io::Error::new(io::ErrorKind::Other, "truncate refused"),
                ));
            }
            LocalFs.truncate(path, len)
        }
    }

    fn summary(rel_oid: u32, seed: u8, rows: u64) -> WriteSummary {
        let block_id = BlockId::from_bytes([seed; 16]);
        WriteSummary {
            file_name: PathBuf::from(format!("/data/{rel_oid}_pax/{block_id}")),
            block_id,
            file_size: rows * 10,
            num_tuples: rows,
            rel_oid,
            stats: PartitionStats::default(),
        }
    }

    fn ids(entries: &[MicroPartitionMetadata]) -> Vec<BlockId> {
        entries.iter().map(|e| e.micro_partition_id).collect()
    }

    #[test]
    fn snapshots_isolate_publishes() {
        let catalog = AuxCatalog::in_memory();
        assert_eq!(catalog.snapshot(), Snapshot::MIN);
        let first = catalog.register(&summary(1, 1, 10)).unwrap();
        let second = catalog.register(&summary(1, 2, 20)).unwrap();
        assert!(second > first);

        assert_eq!(catalog.scan(1, first).unwrap().len(), 1);
        assert_eq!(catalog.scan(1, second).unwrap().len(), 2);
        assert!(catalog.scan(2, second).unwrap().is_empty());

        let swap = catalog
            .publish(1, &[summary(1, 3, 25)], &[BlockId::from_bytes([1; 16])])
            .unwrap();
        assert_eq!(
            ids(&catalog.scan(1, swap).unwrap()),
            vec![BlockId::from_bytes([2; 16]), BlockId::from_bytes([3; 16])]
        );
        // older readers still see the retired block
        assert_eq!(ids(&catalog.scan(1, second).unwrap()).len(), 2);
        assert!(ids(&catalog.scan(1, second).unwrap()).contains(&BlockId::from_bytes([1; 16])));
    }

    #[test]
    fn duplicate_registration_is_ignored() {
        let catalog = AuxCatalog::in_memory();
        catalog.register(&summary(1, 1, 10)).unwrap();
        let snapshot = catalog.register(&summary(1, 1, 10)).unwrap();
        assert_eq!(catalog.scan(1, snapshot).unwrap().len(), 1);
    }

    #[test]
    fn removing_unknown_block_fails_without_effect() {
        let catalog = AuxCatalog::in_memory();
        catalog.register(&summary(1, 1, 10)).unwrap();
        let before = catalog.snapshot();
        let err = catalog
            .publish(1, &[summary(1, 2, 5)], &[BlockId::from_bytes([9; 16])])
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownBlock { rel_oid: 1, .. }));
        assert_eq!(catalog.snapshot(), before);
        assert_eq!(catalog.scan(1, Snapshot::MAX).unwrap().len(), 1);
    }

    #[test]
    fn journal_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.journal");
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFs);
        {
            let catalog = AuxCatalog::open(fs.clone(), &path).unwrap();
            catalog.register(&summary(1, 1, 10)).unwrap();
            catalog.register(&summary(2, 2, 20)).unwrap();
            catalog
                .publish(1, &[summary(1, 3, 7)], &[BlockId::from_bytes([1; 16])])
                .unwrap();
        }
        let catalog = AuxCatalog::open(fs, &path).unwrap();
        assert_eq!(catalog.snapshot(), Snapshot::new(3));
        assert_eq!(catalog.relations(), vec![1, 2]);
        let live = catalog.scan(1, catalog.snapshot()).unwrap();
        assert_eq!(ids(&live), vec![BlockId::from_bytes([3; 16])]);
        assert_eq!(live[0].tuple_count, 7);
        let next = catalog.register(&summary(2, 4, 1)).unwrap();
        assert_eq!(next, Snapshot::new(4));
    }

    #[test]
    fn torn_tail_is_cut_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.journal");
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFs);
        {
            let catalog = AuxCatalog::open(fs.clone(), &path).unwrap();
            catalog.register(&summary(1, 1, 10)).unwrap();
            catalog.register(&summary(1, 2, 10)).unwrap();
        }
        let full = std::fs::metadata(&path).unwrap().len();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(full - 5)
            .unwrap();

        let catalog = AuxCatalog::open(fs.clone(), &path).unwrap();
        assert_eq!(catalog.scan(1, catalog.snapshot()).unwrap().len(), 1);
        catalog.register(&summary(1, 5, 10)).unwrap();
        drop(catalog);

        let catalog = AuxCatalog::open(fs, &path).unwrap();
        assert_eq!(
            ids(&catalog.scan(1, catalog.snapshot()).unwrap()),
            vec![BlockId::from_bytes([1; 16]), BlockId::from_bytes([5; 16])]
        );
    }

    #[test]
    fn failed_append_does_not_hide_later_publishes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.journal");
        let flaky = Arc::new(FlakyFs::default());
        {
            let catalog = AuxCatalog::open(flaky.clone(), &path).unwrap();
            catalog.register(&summary(1, 1, 10)).unwrap();
            flaky.tear_next_write.store(true, Ordering::SeqCst);
            assert!(catalog.register(&summary(1, 2, 10)).is_err());
            let third = catalog.register(&summary(1, 3, 10)).unwrap();
            assert_eq!(third, Snapshot::new(2));
            assert_eq!(
                ids(&catalog.scan(1, third).unwrap()),
                vec![BlockId::from_bytes([1; 16]), BlockId::from_bytes([3; 16])]
            );
        }

        let catalog = AuxCatalog::open(Arc::new(LocalFs), &path).unwrap();
        assert_eq!(catalog.snapshot(), Snapshot::new(2));
        assert_eq!(
            ids(&catalog.scan(1, catalog.snapshot()).unwrap()),
            vec![BlockId::from_bytes([1; 16]), BlockId::from_bytes([3; 16])]
        );
    }

    #[test]
    fn unrecoverable_journal_rejects_publishes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.journal");
        let flaky = Arc::new(FlakyFs::default());
        let catalog = AuxCatalog::open(flaky.clone(), &path).unwrap();
        catalog.register(&summary(1, 1, 10)).unwrap();

        flaky.fail_truncate.store(true, Ordering::SeqCst);
        flaky.tear_next_write.store(true, Ordering::SeqCst);
        assert!(matches!(
            catalog.register(&summary(1, 2, 10)),
            Err(CatalogError::Fs(_))
        ));
        assert!(matches!(
            catalog.register(&summary(1, 3, 10)),
            Err(CatalogError::JournalPoisoned { .. })
        ));
        assert_eq!(catalog.snapshot(), Snapshot::new(1));
        assert_eq!(catalog.scan(1, Snapshot::MAX).unwrap().len(), 1);
    }
}
