use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::Level;

use super::{
    split::{SplitDecision, SplitReason, SplitStats, SplitStrategy},
    PartitionError, PartitionStats, WriteSummary,
};
use crate::{
    catalog::CatalogError,
    format::{ColumnLayout, FormatError, PaxFileWriter, WriterOptions},
    fs::{partition_path, FileSystem},
    id::{BlockId, BlockIdGenerator},
    itemptr::MAX_TUPLE_NUMBER,
    logging::{pax_log, LogContext},
    options::DEFAULT_TARGET_BATCH_ROW_COUNT,
    types::{Row, TupleDesc},
};

/// Invoked exactly once for every closed micro-partition.
pub type WriteSummaryCallback =
    Box<dyn FnMut(&WriteSummary) -> Result<(), CatalogError> + Send>;

/// Everything needed to create and read the micro-partitions of one relation.
pub struct PartitionConfig {
    rel_oid: u32,
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    ids: Arc<BlockIdGenerator>,
    desc: TupleDesc,
    layout: Arc<ColumnLayout>,
    codec: WriterOptions,
    minmax_columns: Vec<usize>,
    read_batch_size: usize,
}

impl PartitionConfig {
    /// Fails when `desc` has a column without a columnar representation.
    pub fn new(
        rel_oid: u32,
        root: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        desc: TupleDesc,
    ) -> Result<Self, FormatError> {
        let layout = Arc::new(ColumnLayout::derive(&desc)?);
        Ok(Self {
            rel_oid,
            root: root.into(),
            fs,
            ids: Arc::new(BlockIdGenerator::new()),
            desc,
            layout,
            codec: WriterOptions::default(),
            minmax_columns: Vec::new(),
            read_batch_size: DEFAULT_TARGET_BATCH_ROW_COUNT,
        })
    }

    /// Share an id generator with other relations of the same engine.
    pub fn with_ids(mut self, ids: Arc<BlockIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Set the codec options.
    pub fn with_codec(mut self, codec: WriterOptions) -> Self {
        self.read_batch_size = codec.target_batch_row_count;
        self.codec = codec;
        self
    }

    /// Set the attributes that get min/max statistics.
    pub fn with_minmax_columns(mut self, minmax_columns: Vec<usize>) -> Self {
        self.minmax_columns = minmax_columns;
        self
    }

    /// Relation the partitions belong to.
    pub fn rel_oid(&self) -> u32 {
        self.rel_oid
    }

    /// Column layout of the relation.
    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    /// File system the partitions are written to.
    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Rows decoded per read batch.
    pub fn read_batch_size(&self) -> usize {
        self.read_batch_size
    }

    /// Data file path of `block_id`.
    pub fn partition_path(&self, block_id: &BlockId) -> PathBuf {
        partition_path(&self.root, self.rel_oid, block_id)
    }
}

impl fmt::Debug for PartitionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionConfig")
            .field("rel_oid", &self.rel_oid)
            .field("root", &self.root)
            .field("layout", &self.layout.type_string())
            .finish()
    }
}

struct OpenPartition {
    block_id: BlockId,
    file: PaxFileWriter,
    stats: PartitionStats,
}

/// Writes one micro-partition at a time and reports each closed file through
/// the summary callback.
pub struct MicroPartitionWriter {
    config: Arc<PartitionConfig>,
    current: Option<OpenPartition>,
    callback: Option<WriteSummaryCallback>,
    log_ctx: LogContext,
}

impl MicroPartitionWriter {
    /// Writer with no open micro-partition.
    pub fn new(config: Arc<PartitionConfig>) -> Self {
        let log_ctx = LogContext::relation(config.rel_oid);
        Self {
            config,
            current: None,
            callback: None,
            log_ctx,
        }
    }

    /// Called with the summary of every closed micro-partition.
    pub fn set_write_summary_callback(&mut self, callback: WriteSummaryCallback) -> &mut Self {
        self.callback = Some(callback);
        self
    }

    /// Allocate a fresh block id and open its file.
    pub fn create(&mut self) -> Result<BlockId, PartitionError> {
        if self.current.is_some() {
            return Err(PartitionError::AlreadyOpen);
        }
        let block_id = self.config.ids.generate();
        let path = self.config.partition_path(&block_id);
        let file = PaxFileWriter::open(
            self.config.fs.as_ref(),
            &path,
            self.config.layout.clone(),
            self.config.codec.clone(),
        )?;
        pax_log!(
            Level::Debug,
            ctx: self.log_ctx,
            "partition_create",
            "block_id={} path={}",
            block_id,
            path.display()
        );
        self.current = Some(OpenPartition {
            block_id,
            file,
            stats: PartitionStats::for_columns(&self.config.minmax_columns),
        });
        Ok(block_id)
    }

    /// Whether a micro-partition is open.
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Block id of the open micro-partition.
    pub fn block_id(&self) -> Option<BlockId> {
        self.current.as_ref().map(|c| c.block_id)
    }

    /// Rows written to the open micro-partition.
    pub fn num_tuples(&self) -> u64 {
        self.current.as_ref().map_or(0, |c| c.file.num_rows())
    }

    /// Bytes written plus bytes still buffered.
    pub fn estimated_size(&self) -> usize {
        self.current.as_ref().map_or(0, |c| c.file.estimated_size())
    }

    /// Append a row; returns its tuple number within the open micro-partition.
    pub fn write_tuple(&mut self, row: &Row) -> Result<u32, PartitionError> {
        let current = self.current.as_mut().ok_or(PartitionError::WriterClosed)?;
        let tuple_number = current.file.num_rows();
        if tuple_number > u64::from(MAX_TUPLE_NUMBER) {
            return Err(PartitionError::TupleOverflow(tuple_number));
        }
        current.file.append_row(row)?;
        current.stats.update(row);
        Ok(tuple_number as u32)
    }

    /// Append `rows` to the open micro-partition.
    pub fn write_tuple_batch(&mut self, rows: &[Row]) -> Result<(), PartitionError> {
        for row in rows {
            self.write_tuple(row)?;
        }
        Ok(())
    }

    /// Finish the open micro-partition and hand its summary to the callback.
    /// A no-op when nothing is open.
    pub fn close(&mut self) -> Result<Option<WriteSummary>, PartitionError> {
        let Some(mut current) = self.current.take() else {
            return Ok(None);
        };
        let file_summary = match current.file.close() {
            Ok(file_summary) => file_summary,
            Err(err) => {
                let _ = remove_if_exists(self.config.fs.as_ref(), current.file.path());
                return Err(err.into());
            }
        };
        let summary = WriteSummary {
            file_name: current.file.path().to_path_buf(),
            block_id: current.block_id,
            file_size: file_summary.file_size,
            num_tuples: file_summary.num_rows,
            rel_oid: self.config.rel_oid,
            stats: current.stats,
        };
        pax_log!(
            Level::Debug,
            ctx: self.log_ctx,
            "partition_close",
            "block_id={} rows={} bytes={}",
            summary.block_id,
            summary.num_tuples,
            summary.file_size
        );
        if let Some(callback) = self.callback.as_mut() {
            if let Err(err) = callback(&summary) {
                // never registered, so the file is garbage
                let _ = self.config.fs.remove(&summary.file_name);
                return Err(err.into());
            }
        }
        Ok(Some(summary))
    }

    /// Drop the open micro-partition without registering it and delete its
    /// file.
    pub fn abandon(&mut self) -> Result<(), PartitionError> {
        if let Some(current) = self.current.take() {
            let path = current.file.path().to_path_buf();
            drop(current);
            pax_log!(
                Level::Debug,
                ctx: self.log_ctx,
                "partition_abandon",
                "path={}",
                path.display()
            );
            remove_if_exists(self.config.fs.as_ref(), &path)?;
        }
        Ok(())
    }
}

pub(crate) fn remove_if_exists(fs: &dyn FileSystem, path: &Path) -> Result<(), PartitionError> {
    match fs.remove(path) {
        Ok(()) => Ok(()),
        Err(err) if err.is_not_found() => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Position of a row written by a [`TableWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLocation {
    /// Micro-partition the row was written to.
    pub block_id: BlockId,
    /// Tuple number within the micro-partition.
    pub tuple_number: u32,
}

/// Writes an unbounded row stream into as many micro-partitions as the split
/// strategy asks for.
pub struct TableWriter {
    writer: MicroPartitionWriter,
    strategy: Arc<dyn SplitStrategy>,
    closed: Vec<WriteSummary>,
    total_tuples: u64,
}

impl TableWriter {
    /// Writer that rolls over according to `strategy`.
    pub fn new(config: Arc<PartitionConfig>, strategy: Arc<dyn SplitStrategy>) -> Self {
        Self {
            writer: MicroPartitionWriter::new(config),
            strategy,
            closed: Vec::new(),
            total_tuples: 0,
        }
    }

    /// Set the callback invoked for every closed micro-partition.
    pub fn with_summary_callback(mut self, callback: WriteSummaryCallback) -> Self {
        self.writer.set_write_summary_callback(callback);
        self
    }

    /// Rows written across every partition.
    pub fn total_tuples(&self) -> u64 {
        self.total_tuples
    }

    /// Write one row, opening a micro-partition on demand and rolling over
    /// when the strategy asks for it.
    pub fn write_tuple(&mut self, row: &Row) -> Result<RowLocation, PartitionError> {
        if !self.writer.is_open() {
            self.writer.create()?;
        }
        let block_id = self.writer.block_id().ok_or(PartitionError::WriterClosed)?;
        let tuple_number = self.writer.write_tuple(row)?;
        self.total_tuples += 1;

        let stats = SplitStats {
            num_tuples: self.writer.num_tuples() as usize,
            estimated_size: self.writer.estimated_size(),
        };
        let decision = if stats.num_tuples > MAX_TUPLE_NUMBER as usize {
            SplitDecision::Split(SplitReason::PointerRange)
        } else {
            self.strategy.evaluate(&stats)
        };
        if let SplitDecision::Split(reason) = decision {
            pax_log!(
                Level::Debug,
                ctx: self.writer.log_ctx,
                "partition_split",
                "block_id={} reason={}",
                block_id,
                reason
            );
            if let Some(summary) = self.writer.close()? {
                self.closed.push(summary);
            }
        }
        Ok(RowLocation {
            block_id,
            tuple_number,
        })
    }

    /// Append `rows`, rolling over as needed, and return their locations.
    pub fn write_tuple_batch(&mut self, rows: &[Row]) -> Result<Vec<RowLocation>, PartitionError> {
        rows.iter().map(|row| self.write_tuple(row)).collect()
    }

    /// Close the open micro-partition and return the summaries of every
    /// micro-partition closed since the last call.
    pub fn close(&mut self) -> Result<Vec<WriteSummary>, PartitionError> {
        if let Some(summary) = self.writer.close()? {
            self.closed.push(summary);
        }
        Ok(std::mem::take(&mut self.closed))
    }

    /// Discard the open micro-partition. Returns the summaries of the already
    /// closed ones so the caller can retire them.
    pub fn abort(&mut self) -> Result<Vec<WriteSummary>, PartitionError> {
        self.writer.abandon()?;
        Ok(std::mem::take(&mut self.closed))
    }
}
