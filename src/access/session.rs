use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use log::Level;

use super::{
    dml_state::{DmlOperation, DmlStateLocal, DmlSummary},
    inserter::remove_files,
    Relation, TmResult,
};
use crate::{
    catalog::{AuxCatalog, BlockMapManager, Catalog, Snapshot, TableMetadata},
    clustering::{cluster, ClusteringDataWriter, ClusteringOptions, PaxClusteringReader, PaxClusteringWriter},
    error::PaxError,
    fs::{FileSystem, LocalFs},
    id::{BlockId, BlockIdGenerator},
    itemptr::ItemPointer,
    logging::{pax_log, LogContext},
    options::{RelOptions, StorageOptions},
    partition::{remove_if_exists, TableReader},
    types::{Row, TupleDesc},
};

/// Shared state of one storage root: the catalog, the block map and the
/// registered relations. Sessions hold it behind an `Arc`.
pub struct StorageEngine {
    options: StorageOptions,
    fs: Arc<dyn FileSystem>,
    catalog: Arc<dyn Catalog>,
    block_map: Arc<BlockMapManager>,
    ids: Arc<BlockIdGenerator>,
    relations: RwLock<HashMap<u32, Arc<Relation>>>,
}

impl StorageEngine {
    /// Open the storage root on the local disk. The catalog journal is
    /// replayed when journaling is enabled.
    pub fn open(options: StorageOptions) -> Result<Arc<Self>, PaxError> {
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFs);
        fs.create_dir_all(options.root())?;
        let catalog: Arc<dyn Catalog> = if options.use_journal {
            Arc::new(AuxCatalog::open(fs.clone(), options.journal_path())?)
        } else {
            Arc::new(AuxCatalog::in_memory())
        };
        pax_log!(
            Level::Info,
            "engine_open",
            "root={} journal={}",
            options.root().display(),
            options.use_journal
        );
        Ok(Self::with_backends(options, fs, catalog))
    }

    /// Assemble an engine over caller-provided file system and catalog.
    pub fn with_backends(
        options: StorageOptions,
        fs: Arc<dyn FileSystem>,
        catalog: Arc<dyn Catalog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            options,
            fs,
            catalog,
            block_map: Arc::new(BlockMapManager::new()),
            ids: Arc::new(BlockIdGenerator::new()),
            relations: RwLock::new(HashMap::new()),
        })
    }

    /// Register a relation's columns and options with this engine.
    pub fn create_relation(
        &self,
        rel_oid: u32,
        desc: TupleDesc,
        options: RelOptions,
    ) -> Result<Arc<Relation>, PaxError> {
        let mut relations = self.relations.write().expect("relations poisoned");
        if relations.contains_key(&rel_oid) {
            return Err(PaxError::RelationExists(rel_oid));
        }
        let rel = Arc::new(Relation::new(
            rel_oid,
            desc,
            options,
            &self.options,
            self.fs.clone(),
            self.ids.clone(),
        )?);
        relations.insert(rel_oid, rel.clone());
        Ok(rel)
    }

    /// Look up a registered relation.
    pub fn relation(&self, rel_oid: u32) -> Result<Arc<Relation>, PaxError> {
        self.relations
            .read()
            .expect("relations poisoned")
            .get(&rel_oid)
            .cloned()
            .ok_or(PaxError::UnknownRelation(rel_oid))
    }

    /// Start a session with its own DML state.
    pub fn session(self: &Arc<Self>) -> Session {
        Session {
            engine: self.clone(),
            dml: DmlStateLocal::default(),
        }
    }

    /// Catalog shared by every session.
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Block number mapping shared by every session.
    pub fn block_map(&self) -> &Arc<BlockMapManager> {
        &self.block_map
    }

    /// Engine-wide storage options.
    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    fn metadata(&self, rel_oid: u32) -> Result<TableMetadata, PaxError> {
        Ok(TableMetadata::create(
            self.catalog.as_ref(),
            rel_oid,
            self.catalog.snapshot(),
        )?)
    }
}

impl fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageEngine")
            .field("options", &self.options)
            .field("snapshot", &self.catalog.snapshot())
            .finish_non_exhaustive()
    }
}

/// Outcome of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    /// The old version is marked deleted; the new one lives here.
    Updated(ItemPointer),
    /// The row was already touched by this statement; nothing was written.
    SelfModified,
}

/// Size of a relation as recorded in the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeEstimate {
    /// Live rows.
    pub num_tuples: u64,
    /// Live micro-partitions.
    pub num_partitions: usize,
    /// Compressed bytes on disk.
    pub on_disk_bytes: u64,
}

/// What a re-clustering pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterSummary {
    /// Rows written by the pass.
    pub rows: u64,
    /// Micro-partitions retired.
    pub partitions_removed: usize,
    /// Micro-partitions written.
    pub partitions_written: usize,
    /// Sorted runs spilled to disk.
    pub spilled_runs: usize,
    /// Snapshot of the swap, `None` when the table was empty.
    pub snapshot: Option<Snapshot>,
}

/// One client of the engine. DML state is private to the session; rows it
/// writes become visible to others when its statement finishes.
pub struct Session {
    engine: Arc<StorageEngine>,
    dml: DmlStateLocal,
}

impl Session {
    /// Engine this session runs on.
    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    /// Open the DML state of a statement on `rel_oid`. The deleter sees the
    /// catalog as of this call.
    pub fn init_dml_state(&mut self, rel_oid: u32, operation: DmlOperation) -> Result<(), PaxError> {
        let rel = self.engine.relation(rel_oid)?;
        self.dml.init(rel, operation, self.engine.catalog.snapshot());
        Ok(())
    }

    /// Stage one row in the relation's open DML state.
    pub fn insert(&mut self, rel_oid: u32, row: &Row) -> Result<ItemPointer, PaxError> {
        let state = self
            .dml
            .find(rel_oid)
            .ok_or(PaxError::DmlStateMissing(rel_oid))?;
        state.inserter(&self.engine.block_map).insert_tuple(row)
    }

    /// Stage `rows` in the relation's open DML state.
    pub fn multi_insert(&mut self, rel_oid: u32, rows: &[Row]) -> Result<Vec<ItemPointer>, PaxError> {
        let state = self
            .dml
            .find(rel_oid)
            .ok_or(PaxError::DmlStateMissing(rel_oid))?;
        state.inserter(&self.engine.block_map).multi_insert(rows)
    }

    /// Mark the row at `tid` deleted in the relation's open DML state.
    pub fn delete(&mut self, rel_oid: u32, tid: ItemPointer) -> Result<TmResult, PaxError> {
        let state = self
            .dml
            .find(rel_oid)
            .ok_or(PaxError::DmlStateMissing(rel_oid))?;
        state.deleter(&self.engine.block_map).mark_delete(tid)
    }

    /// Mark the old version deleted and insert `row` as the new one.
    pub fn update(&mut self, rel_oid: u32, tid: ItemPointer, row: &Row) -> Result<UpdateResult, PaxError> {
        let state = self
            .dml
            .find(rel_oid)
            .ok_or(PaxError::DmlStateMissing(rel_oid))?;
        match state.deleter(&self.engine.block_map).mark_delete(tid)? {
            TmResult::SelfModified => Ok(UpdateResult::SelfModified),
            TmResult::Ok => {
                let new_tid = state.inserter(&self.engine.block_map).insert_tuple(row)?;
                Ok(UpdateResult::Updated(new_tid))
            }
        }
    }

    /// Apply the statement's deletions, publish its inserts and drop the
    /// relation's DML state.
    pub fn finish_dml_state(
        &mut self,
        rel_oid: u32,
        operation: DmlOperation,
    ) -> Result<DmlSummary, PaxError> {
        if self.dml.find(rel_oid).is_none() {
            return Err(PaxError::DmlStateMissing(rel_oid));
        }
        let state = self
            .dml
            .take(rel_oid)
            .ok_or(PaxError::DmlStateMissing(rel_oid))?;
        let result = state.finish(self.engine.catalog.as_ref());
        self.dml.release_scope_if_idle();
        let summary = result?;
        pax_log!(
            Level::Debug,
            ctx: LogContext::relation(rel_oid),
            "dml_state_finish",
            "operation={} inserted={} deleted={} snapshot={:?}",
            operation,
            summary.inserted,
            summary.deleted.rows_removed,
            summary.snapshot
        );
        Ok(summary)
    }

    /// Whether a DML state is open for `rel_oid`.
    pub fn has_dml_state(&mut self, rel_oid: u32) -> bool {
        self.dml.find(rel_oid).is_some()
    }

    /// Drop every open DML state without publishing anything. Files written
    /// by the aborted statements are removed.
    pub fn abort(&mut self) {
        self.dml.reset();
    }

    /// Stream every row of the relation at the current snapshot.
    pub fn scan(&self, rel_oid: u32) -> Result<TableReader, PaxError> {
        let rel = self.engine.relation(rel_oid)?;
        let metadata = self.engine.metadata(rel_oid)?;
        Ok(TableReader::new(
            rel.config().clone(),
            self.engine.block_map.clone(),
            metadata.new_iterator(),
        ))
    }

    /// Rewrite the relation in the order chosen by `options` and swap the
    /// new micro-partitions in for the old ones.
    pub fn cluster_table(
        &mut self,
        rel_oid: u32,
        options: &ClusteringOptions,
    ) -> Result<ClusterSummary, PaxError> {
        let rel = self.engine.relation(rel_oid)?;
        let metadata = self.engine.metadata(rel_oid)?;
        let options = match options.spill_dir() {
            Some(_) => options.clone(),
            None => options.clone().with_spill_dir(self.engine.options.spill_dir()),
        };
        let removed: Vec<BlockId> = metadata
            .partitions()
            .iter()
            .map(|p| p.micro_partition_id)
            .collect();

        let mut reader = PaxClusteringReader::new(TableReader::new(
            rel.config().clone(),
            self.engine.block_map.clone(),
            metadata.new_iterator(),
        ));
        let mut writer = PaxClusteringWriter::new(rel.config().clone(), rel.split_strategy().clone());
        let stats = match cluster(&mut reader, &mut writer, &options).and_then(|stats| {
            writer.close()?;
            Ok(stats)
        }) {
            Ok(stats) => stats,
            Err(err) => {
                if let Ok(closed) = writer.abort() {
                    remove_files(rel.config().fs().as_ref(), &closed);
                }
                return Err(err.into());
            }
        };
        let added = writer.into_summaries();
        if added.is_empty() && removed.is_empty() {
            return Ok(ClusterSummary::default());
        }
        let snapshot = match self.engine.catalog.publish(rel_oid, &added, &removed) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                remove_files(rel.config().fs().as_ref(), &added);
                return Err(err.into());
            }
        };
        for partition in metadata.partitions() {
            if let Err(err) = remove_if_exists(rel.config().fs().as_ref(), &partition.file_name) {
                pax_log!(
                    Level::Warn,
                    ctx: LogContext::relation(rel_oid),
                    "cluster_unlink_failed",
                    "block_id={} error={}",
                    partition.micro_partition_id,
                    err
                );
            }
        }
        Ok(ClusterSummary {
            rows: stats.rows,
            partitions_removed: removed.len(),
            partitions_written: added.len(),
            spilled_runs: stats.spilled_runs,
            snapshot: Some(snapshot),
        })
    }

    /// Compressed bytes of every live micro-partition.
    pub fn relation_size(&self, rel_oid: u32) -> Result<u64, PaxError> {
        self.engine.relation(rel_oid)?;
        Ok(self.engine.metadata(rel_oid)?.total_file_size())
    }

    /// Row, partition and byte counts from the catalog alone; no data file is
    /// opened.
    pub fn estimate_rel_size(&self, rel_oid: u32) -> Result<SizeEstimate, PaxError> {
        self.engine.relation(rel_oid)?;
        let metadata = self.engine.metadata(rel_oid)?;
        Ok(SizeEstimate {
            num_tuples: metadata.num_tuples(),
            num_partitions: metadata.num_partitions(),
            on_disk_bytes: metadata.total_file_size(),
        })
    }

    /// End the session, aborting any DML state left open.
    pub fn close(mut self) {
        self.abort();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.dml.is_empty() {
            self.dml.reset();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("dml_states", &self.dml.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::types::{Attribute, ColumnType, Datum};

    fn open(dir: &TempDir) -> Arc<StorageEngine> {
        StorageEngine::open(
            StorageOptions::from(dir.path())
                .split_max_tuples(4)
                .use_journal(false),
        )
        .unwrap()
    }

    fn desc() -> TupleDesc {
        TupleDesc::new(vec![
            Attribute::new("id", ColumnType::Int8),
            Attribute::new("name", ColumnType::Text),
        ])
    }

    fn row(id: i64) -> Row {
        Row::new(vec![Some(Datum::Int8(id)), Some(Datum::Text(format!("n{id}")))])
    }

    #[test]
    fn dml_without_state_is_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        engine.create_relation(1, desc(), RelOptions::default()).unwrap();
        let mut session = engine.session();
        assert!(matches!(
            session.insert(1, &row(1)),
            Err(PaxError::DmlStateMissing(1))
        ));
        assert!(matches!(
            session.finish_dml_state(1, DmlOperation::Insert),
            Err(PaxError::DmlStateMissing(1))
        ));
        assert!(matches!(
            session.init_dml_state(2, DmlOperation::Insert),
            Err(PaxError::UnknownRelation(2))
        ));
    }

    #[test]
    fn duplicate_relation_is_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        engine.create_relation(1, desc(), RelOptions::default()).unwrap();
        assert!(matches!(
            engine.create_relation(1, desc(), RelOptions::default()),
            Err(PaxError::RelationExists(1))
        ));
    }

    #[test]
    fn rows_are_invisible_until_finish() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        engine.create_relation(1, desc(), RelOptions::default()).unwrap();
        let mut writer = engine.session();
        let reader = engine.session();

        writer.init_dml_state(1, DmlOperation::Insert).unwrap();
        let rows: Vec<Row> = (0..10).map(row).collect();
        writer.multi_insert(1, &rows).unwrap();
        assert_eq!(reader.scan(1).unwrap().count(), 0);

        let summary = writer.finish_dml_state(1, DmlOperation::Insert).unwrap();
        assert_eq!(summary.inserted, 10);
        assert!(summary.snapshot.is_some());
        assert!(!writer.has_dml_state(1));

        let seen: Vec<Row> = reader
            .scan(1)
            .unwrap()
            .map(|r| r.unwrap().1)
            .collect();
        assert_eq!(seen, rows);
        let estimate = reader.estimate_rel_size(1).unwrap();
        assert_eq!(estimate.num_tuples, 10);
        assert_eq!(estimate.num_partitions, 3);
        assert_eq!(estimate.on_disk_bytes, reader.relation_size(1).unwrap());
    }

    #[test]
    fn update_twice_reports_self_modified() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        engine.create_relation(1, desc(), RelOptions::default()).unwrap();
        let mut session = engine.session();
        session.init_dml_state(1, DmlOperation::Insert).unwrap();
        session.multi_insert(1, &[row(1), row(2)]).unwrap();
        session.finish_dml_state(1, DmlOperation::Insert).unwrap();

        let tid = session.scan(1).unwrap().next().unwrap().unwrap().0;
        session.init_dml_state(1, DmlOperation::Update).unwrap();
        assert!(matches!(
            session.update(1, tid, &row(10)).unwrap(),
            UpdateResult::Updated(_)
        ));
        assert_eq!(
            session.update(1, tid, &row(20)).unwrap(),
            UpdateResult::SelfModified
        );
        session.finish_dml_state(1, DmlOperation::Update).unwrap();

        let mut ids: Vec<i64> = session
            .scan(1)
            .unwrap()
            .map(|r| match r.unwrap().1.get(0) {
                Some(Datum::Int8(id)) => *id,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 10]);
    }

    #[test]
    fn dropping_session_discards_open_writes() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        engine.create_relation(1, desc(), RelOptions::default()).unwrap();
        {
            let mut session = engine.session();
            session.init_dml_state(1, DmlOperation::Insert).unwrap();
            session
                .multi_insert(1, &(0..9).map(row).collect::<Vec<_>>())
                .unwrap();
        }
        assert_eq!(engine.session().scan(1).unwrap().count(), 0);
        let rel_dir = crate::fs::relation_dir(dir.path(), 1);
        let leftover = std::fs::read_dir(&rel_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0);
    }
}
