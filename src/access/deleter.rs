use std::{collections::BTreeMap, sync::Arc};

use log::Level;

use super::{inserter::remove_files, Relation, TmResult};
use crate::{
    bitmap::DynamicBitmap,
    catalog::{BlockMapManager, Catalog, MicroPartitionMetadata, Snapshot, TableMetadata},
    error::PaxError,
    id::BlockId,
    itemptr::ItemPointer,
    logging::{pax_log, LogContext},
    partition::{remove_if_exists, MicroPartitionReader, TableWriter, WriteSummary},
};

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteStats {
    /// Micro-partitions rewritten and retired.
    pub blocks: usize,
    /// Rows dropped by the rewrite.
    pub rows_removed: u64,
    /// Rows copied into the replacements.
    pub rows_kept: u64,
    /// Micro-partitions written for the survivors.
    pub partitions_written: usize,
}

/// Collects the deletions of one statement as per-block bitmaps and applies
/// them by rewriting the touched micro-partitions when the statement ends.
pub struct Deleter {
    rel: Arc<Relation>,
    snapshot: Snapshot,
    block_map: Arc<BlockMapManager>,
    bitmaps: BTreeMap<BlockId, DynamicBitmap>,
    log_ctx: LogContext,
}

impl Deleter {
    pub(crate) fn new(rel: Arc<Relation>, snapshot: Snapshot, block_map: Arc<BlockMapManager>) -> Self {
        let log_ctx = LogContext::relation(rel.rel_oid());
        Self {
            rel,
            snapshot,
            block_map,
            bitmaps: BTreeMap::new(),
            log_ctx,
        }
    }

    /// Catalog snapshot the marks were taken under.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    fn resolve(&self, tid: ItemPointer) -> Result<(BlockId, u32), PaxError> {
        if !tid.is_valid() {
            return Err(PaxError::InvalidItemPointer(tid));
        }
        let (table_no, block_number, tuple_number) = tid.decompose();
        let block_id = self
            .block_map
            .block_id(self.rel.rel_oid(), table_no, block_number)
            .ok_or(PaxError::InvalidItemPointer(tid))?;
        Ok((block_id, tuple_number))
    }

    /// Mark the row at `tid` deleted. Returns `SelfModified` when this
    /// statement already marked it.
    pub fn mark_delete(&mut self, tid: ItemPointer) -> Result<TmResult, PaxError> {
        let (block_id, tuple_number) = self.resolve(tid)?;
        let bitmap = self.bitmaps.entry(block_id).or_default();
        if !bitmap.grow_to_fit(tuple_number) {
            return Err(PaxError::InvalidItemPointer(tid));
        }
        if bitmap.test(tuple_number) {
            return Ok(TmResult::SelfModified);
        }
        bitmap.set(tuple_number);
        Ok(TmResult::Ok)
    }

    /// Whether `tid` is marked by this statement.
    pub fn is_marked(&self, tid: ItemPointer) -> bool {
        let Ok((block_id, tuple_number)) = self.resolve(tid) else {
            return false;
        };
        self.bitmaps
            .get(&block_id)
            .map_or(false, |bitmap| bitmap.test(tuple_number))
    }

    /// Blocks with at least one mark.
    pub fn touched_blocks(&self) -> usize {
        self.bitmaps.len()
    }

    /// Number of marked rows across every block.
    pub fn marked_rows(&self) -> u64 {
        self.bitmaps.values().map(|b| u64::from(b.count_ones())).sum()
    }

    /// Rewrite every touched micro-partition without its marked rows, swap
    /// the new partitions in with one catalog change, then unlink the old
    /// files. A no-op when nothing was marked.
    pub fn exec_delete(&mut self, catalog: &dyn Catalog) -> Result<DeleteStats, PaxError> {
        if self.bitmaps.is_empty() {
            return Ok(DeleteStats::default());
        }
        let bitmaps = std::mem::take(&mut self.bitmaps);
        let metadata = TableMetadata::create(catalog, self.rel.rel_oid(), self.snapshot)?;
        let targets: Vec<MicroPartitionMetadata> = metadata
            .filtered_iterator(|p| bitmaps.contains_key(&p.micro_partition_id))
            .collect();
        pax_log!(
            Level::Debug,
            ctx: self.log_ctx,
            "compaction_start",
            "blocks={} marked={}",
            targets.len(),
            bitmaps.values().map(|b| u64::from(b.count_ones())).sum::<u64>()
        );

        let mut writer = TableWriter::new(
            self.rel.config().clone(),
            self.rel.split_strategy().clone(),
        );
        let mut stats = DeleteStats::default();
        let added = match self.rewrite(&targets, &bitmaps, &mut writer, &mut stats) {
            Ok(added) => added,
            Err(err) => {
                if let Ok(closed) = writer.abort() {
                    remove_files(self.rel.config().fs().as_ref(), &closed);
                }
                return Err(err);
            }
        };
        let removed: Vec<BlockId> = targets.iter().map(|p| p.micro_partition_id).collect();
        if let Err(err) = catalog.publish(self.rel.rel_oid(), &added, &removed) {
            remove_files(self.rel.config().fs().as_ref(), &added);
            return Err(err.into());
        }
        // the replacements are published; only now may the old files go
        for partition in &targets {
            if let Err(err) = remove_if_exists(self.rel.config().fs().as_ref(), &partition.file_name) {
                pax_log!(
                    Level::Warn,
                    ctx: self.log_ctx,
                    "compaction_unlink_failed",
                    "block_id={} error={}",
                    partition.micro_partition_id,
                    err
                );
            }
        }
        stats.blocks = targets.len();
        stats.partitions_written = added.len();
        pax_log!(
            Level::Debug,
            ctx: self.log_ctx,
            "compaction_finish",
            "blocks={} removed={} kept={} written={}",
            stats.blocks,
            stats.rows_removed,
            stats.rows_kept,
            stats.partitions_written
        );
        Ok(stats)
    }

    fn rewrite(
        &self,
        targets: &[MicroPartitionMetadata],
        bitmaps: &BTreeMap<BlockId, DynamicBitmap>,
        writer: &mut TableWriter,
        stats: &mut DeleteStats,
    ) -> Result<Vec<WriteSummary>, PaxError> {
        for partition in targets {
            let Some(bitmap) = bitmaps.get(&partition.micro_partition_id) else {
                continue;
            };
            let mut reader = MicroPartitionReader::open(
                self.rel.config(),
                &partition.file_name,
                partition.micro_partition_id,
            )?;
            while let Some((tuple_number, row)) = reader.read_tuple()? {
                if bitmap.test(tuple_number) {
                    stats.rows_removed += 1;
                    continue;
                }
                writer.write_tuple(&row)?;
                stats.rows_kept += 1;
            }
        }
        Ok(writer.close()?)
    }

    /// Forget every mark.
    pub fn clear(&mut self) {
        self.bitmaps.clear();
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        catalog::AuxCatalog,
        fs::LocalFs,
        id::BlockIdGenerator,
        options::{RelOptions, StorageOptions},
        types::{Attribute, ColumnType, Datum, Row, TupleDesc},
    };

    fn relation(dir: &TempDir) -> Arc<Relation> {
        let desc = TupleDesc::new(vec![Attribute::new("v", ColumnType::Int4)]);
        let storage = StorageOptions::from(dir.path()).split_max_tuples(8);
        Arc::new(
            Relation::new(
                7,
                desc,
                RelOptions::default(),
                &storage,
                Arc::new(LocalFs),
                Arc::new(BlockIdGenerator::new()),
            )
            .unwrap(),
        )
    }

    fn write_block(rel: &Relation, catalog: &AuxCatalog, rows: i32) -> BlockId {
        let mut writer = TableWriter::new(rel.config().clone(), rel.split_strategy().clone());
        for v in 0..rows {
            writer
                .write_tuple(&Row::new(vec![Some(Datum::Int4(v))]))
                .unwrap();
        }
        let summaries = writer.close().unwrap();
        catalog.publish(rel.rel_oid(), &summaries, &[]).unwrap();
        summaries[0].block_id
    }

    #[test]
    fn marks_stay_within_their_block() {
        let dir = TempDir::new().unwrap();
        let rel = relation(&dir);
        let block_map = Arc::new(BlockMapManager::new());
        let catalog = AuxCatalog::in_memory();
        let block_id = write_block(&rel, &catalog, 6);
        let (table_no, block_number) = block_map.block_number(7, &block_id).unwrap();

        let mut deleter = Deleter::new(rel, catalog.snapshot(), block_map);
        let first = ItemPointer::new(table_no, block_number, 1);
        let second = ItemPointer::new(table_no, block_number, 4);
        assert_eq!(deleter.mark_delete(first).unwrap(), TmResult::Ok);
        assert_eq!(deleter.mark_delete(first).unwrap(), TmResult::SelfModified);
        assert!(deleter.is_marked(first));
        assert!(!deleter.is_marked(second));

        // past the written rows is harmless
        let far = ItemPointer::new(table_no, block_number, 70_000);
        assert_eq!(deleter.mark_delete(far).unwrap(), TmResult::Ok);
        assert!(deleter.is_marked(far));
        assert_eq!(deleter.touched_blocks(), 1);
        assert_eq!(deleter.marked_rows(), 2);
    }

    #[test]
    fn exec_delete_swaps_in_survivors() {
        let dir = TempDir::new().unwrap();
        let rel = relation(&dir);
        let block_map = Arc::new(BlockMapManager::new());
        let catalog = AuxCatalog::in_memory();
        let block_id = write_block(&rel, &catalog, 5);
        let (table_no, block_number) = block_map.block_number(7, &block_id).unwrap();
        let old_path = rel.config().partition_path(&block_id);

        let mut deleter = Deleter::new(rel.clone(), catalog.snapshot(), block_map);
        for tuple in [0, 2, 4] {
            deleter
                .mark_delete(ItemPointer::new(table_no, block_number, tuple))
                .unwrap();
        }
        let stats = deleter.exec_delete(&catalog).unwrap();
        assert_eq!(
            stats,
            DeleteStats {
                blocks: 1,
                rows_removed: 3,
                rows_kept: 2,
                partitions_written: 1,
            }
        );
        assert!(!old_path.exists());

        let live = catalog.scan(7, catalog.snapshot()).unwrap();
        assert_eq!(live.len(), 1);
        assert_ne!(live[0].micro_partition_id, block_id);
        let mut reader =
            MicroPartitionReader::open(rel.config(), &live[0].file_name, live[0].micro_partition_id)
                .unwrap();
        let mut values = Vec::new();
        while let Some((_, row)) = reader.read_tuple().unwrap() {
            values.push(row.get(0).cloned());
        }
        assert_eq!(values, vec![Some(Datum::Int4(1)), Some(Datum::Int4(3))]);

        // nothing left to apply
        assert_eq!(deleter.exec_delete(&catalog).unwrap(), DeleteStats::default());
    }
}
