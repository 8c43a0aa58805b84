use std::{
    io::{self, Write},
    mem,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::{
    array::{ArrayRef, BinaryArray, Int64Array},
    buffer::{Buffer, NullBuffer, OffsetBuffer, ScalarBuffer},
    record_batch::RecordBatch,
};
use parquet::{
    arrow::ArrowWriter,
    basic::{Compression, Encoding, GzipLevel, ZstdLevel},
    file::{metadata::KeyValue, properties::WriterProperties},
    schema::types::ColumnPath,
};

use super::{
    datum_to_binary, datum_to_long, ColumnLayout, FormatError, ScratchBuffer, StorageClass,
    PAX_SCHEMA_KEY,
};
use crate::{
    fs::{FileSystem, FileWrite},
    options::{CompressType, DEFAULT_TARGET_BATCH_ROW_COUNT, DEFAULT_TARGET_STRIPE_BYTE_SIZE},
    types::Row,
};

/// Codec-level write options.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub(crate) target_batch_row_count: usize,
    pub(crate) target_stripe_byte_size: usize,
    pub(crate) compress_type: CompressType,
    pub(crate) compress_level: i32,
    /// Relation attribute numbers that get a bloom filter.
    pub(crate) bloom_filter_columns: Vec<usize>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            target_batch_row_count: DEFAULT_TARGET_BATCH_ROW_COUNT,
            target_stripe_byte_size: DEFAULT_TARGET_STRIPE_BYTE_SIZE,
            compress_type: CompressType::None,
            compress_level: 0,
            bloom_filter_columns: Vec::new(),
        }
    }
}

impl WriterOptions {
    /// Row group row count and stripe byte size.
    pub fn with_batch(mut self, target_batch_row_count: usize, target_stripe_byte_size: usize) -> Self {
        self.target_batch_row_count = target_batch_row_count.max(1);
        self.target_stripe_byte_size = target_stripe_byte_size;
        self
    }

    /// Compression or encoding applied to every column.
    pub fn with_compression(mut self, compress_type: CompressType, compress_level: i32) -> Self {
        self.compress_type = compress_type;
        self.compress_level = compress_level;
        self
    }

    /// Attributes that get a bloom filter.
    pub fn with_bloom_filter_columns(mut self, columns: Vec<usize>) -> Self {
        self.bloom_filter_columns = columns;
        self
    }

    fn writer_properties(&self, layout: &ColumnLayout) -> Result<WriterProperties, FormatError> {
        let mut builder = WriterProperties::builder()
            .set_key_value_metadata(Some(vec![KeyValue::new(
                PAX_SCHEMA_KEY.to_string(),
                layout.type_string().to_string(),
            )]))
            .set_max_row_group_size(usize::MAX);

        builder = match self.compress_type {
            CompressType::None => builder
                .set_compression(Compression::UNCOMPRESSED)
                .set_dictionary_enabled(false),
            CompressType::Rle | CompressType::Dictionary => builder
                .set_compression(Compression::UNCOMPRESSED)
                .set_dictionary_enabled(true),
            CompressType::Delta => {
                let mut builder = builder
                    .set_compression(Compression::UNCOMPRESSED)
                    .set_dictionary_enabled(false);
                for col in layout.columns() {
                    let encoding = match col.class {
                        StorageClass::Long => Encoding::DELTA_BINARY_PACKED,
                        StorageClass::Binary => Encoding::DELTA_LENGTH_BYTE_ARRAY,
                    };
                    builder = builder.set_column_encoding(ColumnPath::from(col.name.as_str()), encoding);
                }
                builder
            }
            CompressType::Zstd => {
                let level = if self.compress_level == 0 {
                    ZstdLevel::default()
                } else {
                    ZstdLevel::try_new(self.compress_level)?
                };
                builder.set_compression(Compression::ZSTD(level))
            }
            CompressType::Zlib => {
                let level = GzipLevel::try_new(self.compress_level.max(0) as u32)?;
                builder.set_compression(Compression::GZIP(level))
            }
        };

        for attno in &self.bloom_filter_columns {
            if let Some(index) = layout.stored_index(*attno) {
                let name = layout.columns()[index].name.as_str();
                builder = builder.set_column_bloom_filter_enabled(ColumnPath::from(name), true);
            }
        }
        Ok(builder.build())
    }
}

/// Outcome of a finished micro-partition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSummary {
    /// Rows written.
    pub num_rows: u64,
    /// Bytes written.
    pub file_size: u64,
}

struct CountingWrite {
    inner: Box<dyn FileWrite>,
    written: u64,
}

impl Write for CountingWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

enum ColumnBuffer {
    Long {
        values: Vec<i64>,
        valid: Vec<bool>,
    },
    Binary {
        scratch: ScratchBuffer,
        offsets: Vec<i32>,
        valid: Vec<bool>,
    },
}

impl ColumnBuffer {
    fn new(class: StorageClass, rows: usize) -> Self {
        match class {
            StorageClass::Long => ColumnBuffer::Long {
                values: Vec::with_capacity(rows),
                valid: Vec::with_capacity(rows),
            },
            StorageClass::Binary => {
                let mut offsets = Vec::with_capacity(rows + 1);
                offsets.push(0);
                ColumnBuffer::Binary {
                    scratch: ScratchBuffer::new(),
                    offsets,
                    valid: Vec::with_capacity(rows),
                }
            }
        }
    }

    fn buffered_bytes(&self) -> usize {
        match self {
            ColumnBuffer::Long { values, .. } => values.len() * mem::size_of::<i64>(),
            ColumnBuffer::Binary { scratch, offsets, .. } => {
                scratch.len() + offsets.len() * mem::size_of::<i32>()
            }
        }
    }

    fn take_array(&mut self) -> Result<ArrayRef, FormatError> {
        match self {
            ColumnBuffer::Long { values, valid } => {
                let values = ScalarBuffer::from(mem::take(values));
                let nulls = NullBuffer::from(mem::take(valid));
                Ok(Arc::new(Int64Array::new(values, Some(nulls))))
            }
            ColumnBuffer::Binary {
                scratch,
                offsets,
                valid,
            } => {
                let offsets = OffsetBuffer::new(ScalarBuffer::from(mem::replace(offsets, vec![0])));
                let data = Buffer::from_slice_ref(scratch.as_slice());
                let nulls = NullBuffer::from(mem::take(valid));
                scratch.reset();
                Ok(Arc::new(BinaryArray::try_new(offsets, data, Some(nulls))?))
            }
        }
    }
}

/// In-memory row batch in columnar form.
struct RowBatch {
    columns: Vec<ColumnBuffer>,
    rows: usize,
}

impl RowBatch {
    fn new(layout: &ColumnLayout, rows: usize) -> Self {
        Self {
            columns: layout
                .columns()
                .iter()
                .map(|col| ColumnBuffer::new(col.class, rows))
                .collect(),
            rows: 0,
        }
    }

    /// Whether the variable-length payloads of `row` fit in the scratch
    /// buffers without a flush.
    fn fits(&self, layout: &ColumnLayout, row: &Row) -> bool {
        layout
            .columns()
            .iter()
            .zip(&self.columns)
            .all(|(col, buffer)| match buffer {
                ColumnBuffer::Binary { scratch, .. } => {
                    let len = row.get(col.attno).and_then(datum_to_binary).map_or(0, <[u8]>::len);
                    scratch.can_fit(len)
                }
                ColumnBuffer::Long { .. } => true,
            })
    }

    fn append(&mut self, layout: &ColumnLayout, row: &Row) -> Result<(), FormatError> {
        if row.len() < layout.natts() {
            return Err(FormatError::RowWidth {
                expected: layout.natts(),
                found: row.len(),
            });
        }
        // type check the whole row first so a bad value never leaves a
        // partially appended row behind
        for col in layout.columns() {
            if let Some(datum) = row.get(col.attno) {
                if !col.ty.accepts(datum) {
                    return Err(FormatError::TypeMismatch {
                        column: col.name.clone(),
                        ty: col.ty,
                    });
                }
            }
        }
        for (col, buffer) in layout.columns().iter().zip(self.columns.iter_mut()) {
            let datum = row.get(col.attno);
            match buffer {
                ColumnBuffer::Long { values, valid } => {
                    values.push(datum.and_then(datum_to_long).unwrap_or_default());
                    valid.push(datum.is_some());
                }
                ColumnBuffer::Binary {
                    scratch,
                    offsets,
                    valid,
                } => {
                    let end = match datum.and_then(datum_to_binary) {
                        Some(bytes) => scratch.append(bytes)?,
                        None => scratch.len(),
                    };
                    offsets.push(end as i32);
                    valid.push(datum.is_some());
                }
            }
        }
        self.rows += 1;
        Ok(())
    }

    fn buffered_bytes(&self) -> usize {
        self.columns.iter().map(ColumnBuffer::buffered_bytes).sum()
    }

    fn take(&mut self, layout: &ColumnLayout) -> Result<RecordBatch, FormatError> {
        let arrays = self
            .columns
            .iter_mut()
            .map(ColumnBuffer::take_array)
            .collect::<Result<Vec<_>, _>>()?;
        self.rows = 0;
        Ok(RecordBatch::try_new(layout.schema().clone(), arrays)?)
    }
}

/// Streaming writer of one micro-partition file.
///
/// Rows are appended to an in-memory batch which is handed to the column
/// writer every `target_batch_row_count` rows; the column writer closes a
/// stripe once its in-progress size reaches `target_stripe_byte_size`.
pub struct PaxFileWriter {
    path: PathBuf,
    layout: Arc<ColumnLayout>,
    options: WriterOptions,
    batch: RowBatch,
    writer: Option<ArrowWriter<CountingWrite>>,
    num_rows: u64,
}

impl PaxFileWriter {
    /// Create the file at `path`.
    pub fn open(
        fs: &dyn FileSystem,
        path: &Path,
        layout: Arc<ColumnLayout>,
        options: WriterOptions,
    ) -> Result<Self, FormatError> {
        let props = options.writer_properties(&layout)?;
        let file = fs.create(path)?;
        let writer = ArrowWriter::try_new(
            CountingWrite {
                inner: file,
                written: 0,
            },
            layout.schema().clone(),
            Some(props),
        )?;
        let batch = RowBatch::new(&layout, options.target_batch_row_count);
        Ok(Self {
            path: path.to_path_buf(),
            layout,
            options,
            batch,
            writer: Some(writer),
            num_rows: 0,
        })
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Layout the rows are stored with.
    pub fn layout(&self) -> &Arc<ColumnLayout> {
        &self.layout
    }

    /// Rows appended so far.
    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Bytes written plus bytes buffered in memory.
    pub fn estimated_size(&self) -> usize {
        let written = self
            .writer
            .as_ref()
            .map_or(0, |w| w.bytes_written() + w.in_progress_size());
        written + self.batch.buffered_bytes()
    }

    /// Append one row. Values past the relation's columns are ignored.
    pub fn append_row(&mut self, row: &Row) -> Result<(), FormatError> {
        if self.writer.is_none() {
            return Err(FormatError::WriterClosed);
        }
        if !self.batch.fits(&self.layout, row) && self.batch.rows > 0 {
            self.flush()?;
        }
        self.batch.append(&self.layout, row)?;
        self.num_rows += 1;
        if self.batch.rows >= self.options.target_batch_row_count {
            self.flush()?;
        }
        Ok(())
    }

    /// Hand the buffered batch to the column writer.
    pub fn flush(&mut self) -> Result<(), FormatError> {
        let writer = self.writer.as_mut().ok_or(FormatError::WriterClosed)?;
        if self.batch.rows == 0 {
            return Ok(());
        }
        let batch = self.batch.take(&self.layout)?;
        writer.write(&batch)?;
        if writer.in_progress_size() >= self.options.target_stripe_byte_size {
            writer.flush()?;
        }
        Ok(())
    }

    /// Flush the partial batch, write the footer and sync the file.
    pub fn close(&mut self) -> Result<FileSummary, FormatError> {
        self.flush()?;
        let writer = self.writer.take().ok_or(FormatError::WriterClosed)?;
        let mut file = writer.into_inner()?;
        file.inner.sync()?;
        Ok(FileSummary {
            num_rows: self.num_rows,
            file_size: file.written,
        })
    }

    /// Whether the file was finished.
    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}
