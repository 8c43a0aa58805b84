use std::{path::Path, sync::Arc};

use arrow::{
    array::{Array, AsArray},
    datatypes::Int64Type,
    record_batch::RecordBatch,
};
use bytes::Bytes;
use parquet::{
    arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder},
    data_type::ByteArray,
    file::{
        properties::ReaderProperties,
        reader::{FileReader, RowGroupReader},
        serialized_reader::{ReadOptionsBuilder, SerializedFileReader},
    },
};

use super::{
    binary_to_datum, datum_to_binary, datum_to_long, long_to_datum, ColumnLayout, FormatError,
    StorageClass, PAX_SCHEMA_KEY,
};
use crate::{
    fs::FileSystem,
    types::{Datum, Row, TupleDesc},
};

/// Row-at-a-time reader of one micro-partition file.
///
/// Not restartable: reaching the end requires a fresh [`open`](Self::open) to
/// read again.
pub struct PaxFileReader {
    layout: Arc<ColumnLayout>,
    data: Bytes,
    batches: ParquetRecordBatchReader,
    current: Option<RecordBatch>,
    offset: usize,
    num_rows: u64,
}

impl PaxFileReader {
    /// Open `path` and check it was written for `desc`.
    pub fn open(
        fs: &dyn FileSystem,
        path: &Path,
        desc: &TupleDesc,
        batch_size: usize,
    ) -> Result<Self, FormatError> {
        let layout = Arc::new(ColumnLayout::derive(desc)?);
        let data = fs.read(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(data.clone())?;

        let file_metadata = builder.metadata().file_metadata();
        let stored = file_metadata
            .key_value_metadata()
            .and_then(|kvs| kvs.iter().find(|kv| kv.key == PAX_SCHEMA_KEY))
            .and_then(|kv| kv.value.clone())
            .ok_or_else(|| FormatError::Corrupt(format!("{} has no {PAX_SCHEMA_KEY}", path.display())))?;
        if stored != layout.type_string() {
            return Err(FormatError::SchemaMismatch {
                expected: layout.type_string().to_string(),
                found: stored,
            });
        }
        let num_rows = u64::try_from(file_metadata.num_rows())
            .map_err(|_| FormatError::Corrupt("negative row count".to_string()))?;

        let batches = builder.with_batch_size(batch_size.max(1)).build()?;
        Ok(Self {
            layout,
            data,
            batches,
            current: None,
            offset: 0,
            num_rows,
        })
    }

    /// Row count recorded in the file footer.
    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Size of the file in bytes.
    pub fn file_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Layout the file is read with.
    pub fn layout(&self) -> &Arc<ColumnLayout> {
        &self.layout
    }

    /// Next row in write order, `None` at end of file.
    pub fn read_next_row(&mut self) -> Result<Option<Row>, FormatError> {
        loop {
            if let Some(batch) = &self.current {
                if self.offset < batch.num_rows() {
                    let row = decode_row(&self.layout, batch, self.offset)?;
                    self.offset += 1;
                    return Ok(Some(row));
                }
            }
            match self.batches.next() {
                Some(batch) => {
                    self.current = Some(batch?);
                    self.offset = 0;
                }
                None => {
                    self.current = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Probe the bloom filters of column `attno` for `value`. Columns without
    /// a filter, dropped or unknown ones included, always report a possible
    /// match.
    pub fn might_contain(&self, attno: usize, value: &Datum) -> Result<bool, FormatError> {
        let Some(index) = self.layout.stored_index(attno) else {
            return Ok(true);
        };
        let options = ReadOptionsBuilder::new()
            .with_reader_properties(
                ReaderProperties::builder()
                    .set_read_bloom_filter(true)
                    .build(),
            )
            .build();
        let reader = SerializedFileReader::new_with_options(self.data.clone(), options)?;
        for group in 0..reader.num_row_groups() {
            let row_group = reader.get_row_group(group)?;
            let Some(filter) = row_group.get_column_bloom_filter(index) else {
                return Ok(true);
            };
            let hit = match self.layout.columns()[index].class {
                StorageClass::Long => datum_to_long(value).map_or(true, |v| filter.check(&v)),
                StorageClass::Binary => datum_to_binary(value)
                    .map_or(true, |v| filter.check(&ByteArray::from(v.to_vec()))),
            };
            if hit {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn decode_row(layout: &ColumnLayout, batch: &RecordBatch, offset: usize) -> Result<Row, FormatError> {
    if batch.num_columns() != layout.columns().len() {
        return Err(FormatError::Corrupt(format!(
            "batch has {} columns, expected {}",
            batch.num_columns(),
            layout.columns().len()
        )));
    }
    let mut values: Vec<Option<Datum>> = vec![None; layout.natts()];
    for (col, array) in layout.columns().iter().zip(batch.columns()) {
        if array.is_null(offset) {
            continue;
        }
        let datum = match col.class {
            StorageClass::Long => {
                let array = array
                    .as_primitive_opt::<Int64Type>()
                    .ok_or_else(|| FormatError::Corrupt(format!("column {} is not long", col.name)))?;
                long_to_datum(col.ty, array.value(offset))?
            }
            StorageClass::Binary => {
                let array = array
                    .as_binary_opt::<i32>()
                    .ok_or_else(|| FormatError::Corrupt(format!("column {} is not binary", col.name)))?;
                binary_to_datum(col.ty, array.value(offset))?
            }
        };
        values[col.attno] = Some(datum);
    }
    Ok(Row::new(values))
}
