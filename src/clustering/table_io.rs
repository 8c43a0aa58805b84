use std::sync::Arc;

use super::{ClusteringDataReader, ClusteringDataWriter, ClusteringError};
use crate::{
    partition::{PartitionConfig, SplitStrategy, TableReader, TableWriter, WriteSummary},
    types::Row,
};

/// Reads every row of a relation snapshot, dropping the row pointers.
pub struct PaxClusteringReader {
    inner: Option<TableReader>,
}

impl PaxClusteringReader {
    /// Source over every live row of a table.
    pub fn new(reader: TableReader) -> Self {
        Self {
            inner: Some(reader),
        }
    }
}

impl ClusteringDataReader for PaxClusteringReader {
    fn next_tuple(&mut self) -> Result<Option<Row>, ClusteringError> {
        let Some(reader) = self.inner.as_mut() else {
            return Ok(None);
        };
        Ok(reader.read_next()?.map(|(_, row)| row))
    }

    fn close(&mut self) -> Result<(), ClusteringError> {
        self.inner = None;
        Ok(())
    }
}

/// Writes clustered rows into fresh micro-partitions. The summaries are kept
/// for the caller to publish; nothing is registered here.
pub struct PaxClusteringWriter {
    writer: TableWriter,
    summaries: Vec<WriteSummary>,
}

impl PaxClusteringWriter {
    /// Destination that rolls rows into new micro-partitions.
    pub fn new(config: Arc<PartitionConfig>, strategy: Arc<dyn SplitStrategy>) -> Self {
        Self {
            writer: TableWriter::new(config, strategy),
            summaries: Vec::new(),
        }
    }

    /// Summaries of every micro-partition closed so far.
    pub fn summaries(&self) -> &[WriteSummary] {
        &self.summaries
    }

    /// Micro-partitions closed by the writer.
    pub fn into_summaries(self) -> Vec<WriteSummary> {
        self.summaries
    }

    /// Drop the open micro-partition and return every closed one, so the
    /// caller can remove their files.
    pub fn abort(&mut self) -> Result<Vec<WriteSummary>, ClusteringError> {
        let mut closed = std::mem::take(&mut self.summaries);
        closed.extend(self.writer.abort()?);
        Ok(closed)
    }
}

impl ClusteringDataWriter for PaxClusteringWriter {
    fn write_tuple(&mut self, row: &Row) -> Result<(), ClusteringError> {
        self.writer.write_tuple(row)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ClusteringError> {
        self.summaries.extend(self.writer.close()?);
        Ok(())
    }
}
