use std::sync::{Arc, Mutex};

use log::Level;

use super::Relation;
use crate::{
    catalog::{BlockMapManager, Catalog, Snapshot},
    error::PaxError,
    fs::FileSystem,
    itemptr::ItemPointer,
    logging::{pax_log, LogContext},
    partition::{remove_if_exists, TableWriter, WriteSummary},
    types::Row,
};

/// Routes the inserts of one statement into micro-partitions.
///
/// Closed micro-partitions are staged and published together when the
/// statement finishes, so an aborted statement never exposes rows.
pub struct Inserter {
    rel: Arc<Relation>,
    writer: Option<TableWriter>,
    staged: Arc<Mutex<Vec<WriteSummary>>>,
    block_map: Arc<BlockMapManager>,
    inserted: u64,
    log_ctx: LogContext,
}

impl Inserter {
    pub(crate) fn new(rel: Arc<Relation>, block_map: Arc<BlockMapManager>) -> Self {
        let staged = Arc::new(Mutex::new(Vec::new()));
        let sink = staged.clone();
        let writer = TableWriter::new(rel.config().clone(), rel.split_strategy().clone())
            .with_summary_callback(Box::new(move |summary: &WriteSummary| {
                sink.lock().expect("staged summaries poisoned").push(summary.clone());
                Ok(())
            }));
        let log_ctx = LogContext::relation(rel.rel_oid());
        Self {
            rel,
            writer: Some(writer),
            staged,
            block_map,
            inserted: 0,
            log_ctx,
        }
    }

    /// Tuples inserted through this inserter.
    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    /// Insert one row and return its row pointer.
    pub fn insert_tuple(&mut self, row: &Row) -> Result<ItemPointer, PaxError> {
        let writer = self.writer.as_mut().ok_or(PaxError::WriterClosed)?;
        let location = writer.write_tuple(row)?;
        self.inserted += 1;
        let (table_no, block_number) = self
            .block_map
            .block_number(self.rel.rel_oid(), &location.block_id)?;
        Ok(ItemPointer::new(
            table_no,
            block_number,
            location.tuple_number,
        ))
    }

    /// Append `rows` in order and return their row pointers.
    pub fn multi_insert(&mut self, rows: &[Row]) -> Result<Vec<ItemPointer>, PaxError> {
        rows.iter().map(|row| self.insert_tuple(row)).collect()
    }

    /// Close the open micro-partition and publish every staged one in a
    /// single catalog change. On failure the unpublished files are removed.
    pub fn finish_insert(&mut self, catalog: &dyn Catalog) -> Result<Option<Snapshot>, PaxError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(None);
        };
        if let Err(err) = writer.close() {
            let _ = writer.abort();
            self.discard_staged();
            return Err(err.into());
        }
        let staged = std::mem::take(&mut *self.staged.lock().expect("staged summaries poisoned"));
        if staged.is_empty() {
            return Ok(None);
        }
        match catalog.publish(self.rel.rel_oid(), &staged, &[]) {
            Ok(snapshot) => {
                pax_log!(
                    Level::Debug,
                    ctx: self.log_ctx,
                    "insert_finish",
                    "partitions={} rows={} snapshot={}",
                    staged.len(),
                    self.inserted,
                    snapshot
                );
                Ok(Some(snapshot))
            }
            Err(err) => {
                remove_files(self.rel.config().fs().as_ref(), &staged);
                Err(err.into())
            }
        }
    }

    /// Drop the statement's writes: the open micro-partition and every
    /// staged one are deleted.
    pub fn abort(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.abort() {
                pax_log!(
                    Level::Warn,
                    ctx: self.log_ctx,
                    "insert_abort_failed",
                    "error={}",
                    err
                );
            }
        }
        self.discard_staged();
    }

    fn discard_staged(&mut self) {
        let staged = std::mem::take(&mut *self.staged.lock().expect("staged summaries poisoned"));
        if !staged.is_empty() {
            pax_log!(
                Level::Debug,
                ctx: self.log_ctx,
                "insert_discard",
                "partitions={}",
                staged.len()
            );
        }
        remove_files(self.rel.config().fs().as_ref(), &staged);
    }
}

pub(crate) fn remove_files(fs: &dyn FileSystem, summaries: &[WriteSummary]) {
    for summary in summaries {
        if let Err(err) = remove_if_exists(fs, &summary.file_name) {
            pax_log!(
                Level::Warn,
                "partition_remove_failed",
                "path={} error={}",
                summary.file_name.display(),
                err
            );
        }
    }
}
