use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use super::{PartitionConfig, PartitionError};
use crate::{
    catalog::{BlockMapManager, MetadataIterator},
    format::PaxFileReader,
    id::BlockId,
    itemptr::ItemPointer,
    types::{Datum, Row},
};

/// Reads the tuples of one micro-partition in write order.
pub struct MicroPartitionReader {
    block_id: BlockId,
    file_name: PathBuf,
    inner: PaxFileReader,
    offset: u64,
}

impl MicroPartitionReader {
    /// Open the data file of `block_id`.
    pub fn open(
        config: &PartitionConfig,
        file_name: &Path,
        block_id: BlockId,
    ) -> Result<Self, PartitionError> {
        let inner = PaxFileReader::open(
            config.fs().as_ref(),
            file_name,
            config.desc(),
            config.read_batch_size(),
        )?;
        Ok(Self {
            block_id,
            file_name: file_name.to_path_buf(),
            inner,
            offset: 0,
        })
    }

    /// Identifier of the micro-partition.
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Path of the data file.
    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    /// Total tuples in the micro-partition.
    pub fn num_tuples(&self) -> u64 {
        self.inner.num_rows()
    }

    /// File length in bytes.
    pub fn length(&self) -> u64 {
        self.inner.file_size()
    }

    /// Tuple number of the next tuple to be read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Next `(tuple_number, row)`, `None` once the file is exhausted.
    pub fn read_tuple(&mut self) -> Result<Option<(u32, Row)>, PartitionError> {
        match self.inner.read_next_row()? {
            Some(row) => {
                let tuple_number = self.offset as u32;
                self.offset += 1;
                Ok(Some((tuple_number, row)))
            }
            None => Ok(None),
        }
    }

    /// Bloom filter probe; see [`PaxFileReader::might_contain`].
    pub fn might_contain(&self, attno: usize, value: &Datum) -> Result<bool, PartitionError> {
        Ok(self.inner.might_contain(attno, value)?)
    }
}

struct ActivePartition {
    table_no: u8,
    block_number: u32,
    reader: MicroPartitionReader,
}

/// Streams `(ItemPointer, Row)` over every micro-partition of a relation
/// snapshot, switching files transparently.
pub struct TableReader {
    config: Arc<PartitionConfig>,
    block_map: Arc<BlockMapManager>,
    partitions: MetadataIterator,
    current: Option<ActivePartition>,
}

impl TableReader {
    /// Reader over `partitions` in order.
    pub fn new(
        config: Arc<PartitionConfig>,
        block_map: Arc<BlockMapManager>,
        partitions: MetadataIterator,
    ) -> Self {
        Self {
            config,
            block_map,
            partitions,
            current: None,
        }
    }

    /// Next row of the table with its row pointer.
    pub fn read_next(&mut self) -> Result<Option<(ItemPointer, Row)>, PartitionError> {
        loop {
            if let Some(active) = self.current.as_mut() {
                if let Some((tuple_number, row)) = active.reader.read_tuple()? {
                    let ctid = ItemPointer::new(active.table_no, active.block_number, tuple_number);
                    return Ok(Some((ctid, row)));
                }
                self.current = None;
            }
            let Some(meta) = self.partitions.next() else {
                return Ok(None);
            };
            let (table_no, block_number) = self
                .block_map
                .block_number(self.config.rel_oid(), &meta.micro_partition_id)?;
            let reader =
                MicroPartitionReader::open(&self.config, &meta.file_name, meta.micro_partition_id)?;
            self.current = Some(ActivePartition {
                table_no,
                block_number,
                reader,
            });
        }
    }
}

impl Iterator for TableReader {
    type Item = Result<(ItemPointer, Row), PartitionError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}
