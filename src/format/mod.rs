//! Micro-partition file codec.
//!
//! One micro-partition is a parquet file whose columns are either `long`
//! (by-value types of at most 8 bytes, stored as their 64-bit pattern) or
//! `binary` (variable length and wide fixed types). The derived type string is
//! stored in the file's key/value metadata and checked on open.

mod reader;
mod scratch;
mod writer;

use std::sync::Arc;

use arrow::{
    datatypes::{DataType, Field, Schema, SchemaRef},
    error::ArrowError,
};
use parquet::errors::ParquetError;
use thiserror::Error;

pub use self::{
    reader::PaxFileReader,
    scratch::{ScratchBuffer, MAX_SCRATCH_BYTES},
    writer::{FileSummary, PaxFileWriter, WriterOptions},
};
use crate::{
    fs::FsError,
    types::{ColumnType, Datum, TupleDesc},
};

/// Key of the file metadata entry carrying the column type string.
pub const PAX_SCHEMA_KEY: &str = "pax.schema";

/// Micro-partition codec failures.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The column type cannot be stored.
    #[error("column {column} of type {ty} has no columnar representation")]
    UnsupportedType {
        /// Column name.
        column: String,
        /// Declared type.
        ty: ColumnType,
    },
    /// A value does not match its column type.
    #[error("value for column {column} does not match its type {ty}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Declared type.
        ty: ColumnType,
    },
    /// The row width differs from the relation.
    #[error("row carries {found} values, relation has {expected} columns")]
    RowWidth {
        /// Number of relation columns.
        expected: usize,
        /// Number of values in the row.
        found: usize,
    },
    /// Stored type string differs from the relation's.
    #[error("micro-partition schema {found} does not match relation schema {expected}")]
    SchemaMismatch {
        /// Type string of the relation.
        expected: String,
        /// Type string stored in the file.
        found: String,
    },
    /// The file content is invalid.
    #[error("corrupt micro-partition: {0}")]
    Corrupt(String),
    /// A variable length value is too large for the scratch buffer.
    #[error("value of {0} bytes exceeds the scratch buffer maximum")]
    ValueTooLarge(usize),
    /// Write after the file was finished.
    #[error("micro-partition writer already closed")]
    WriterClosed,
    /// File system failure.
    #[error("filesystem error: {0}")]
    Fs(#[from] FsError),
    /// Parquet codec failure.
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
    /// Arrow conversion failure.
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

/// Physical column vector a type is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    /// Fixed width value of at most 8 bytes.
    Long,
    /// Variable length bytes.
    Binary,
}

impl StorageClass {
    fn of(ty: ColumnType) -> Option<Self> {
        match ty {
            ColumnType::Internal => None,
            ty if ty.is_by_value() => Some(StorageClass::Long),
            _ => Some(StorageClass::Binary),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            StorageClass::Long => "long",
            StorageClass::Binary => "binary",
        }
    }
}

/// A relation column that is physically stored.
#[derive(Debug, Clone)]
pub struct StoredColumn {
    /// Position in the relation's rows.
    pub attno: usize,
    /// Column name.
    pub name: String,
    /// Declared type.
    pub ty: ColumnType,
    /// Physical vector the values go to.
    pub class: StorageClass,
}

/// Physical layout derived from a tuple descriptor.
#[derive(Debug, Clone)]
pub struct ColumnLayout {
    natts: usize,
    columns: Vec<StoredColumn>,
    schema: SchemaRef,
    type_string: String,
}

impl ColumnLayout {
    /// Derive the stored columns of `desc`. Dropped columns are skipped;
    /// internal types are rejected.
    pub fn derive(desc: &TupleDesc) -> Result<Self, FormatError> {
        let mut columns = Vec::with_capacity(desc.natts());
        for (attno, attr) in desc.attrs().iter().enumerate() {
            if attr.dropped {
                continue;
            }
            let class = StorageClass::of(attr.ty).ok_or_else(|| FormatError::UnsupportedType {
                column: attr.name.clone(),
                ty: attr.ty,
            })?;
            columns.push(StoredColumn {
                attno,
                name: attr.name.clone(),
                ty: attr.ty,
                class,
            });
        }

        let fields: Vec<Field> = columns
            .iter()
            .map(|col| {
                let data_type = match col.class {
                    StorageClass::Long => DataType::Int64,
                    StorageClass::Binary => DataType::Binary,
                };
                Field::new(&col.name, data_type, true)
            })
            .collect();
        let type_string = format!(
            "struct<{}>",
            columns
                .iter()
                .map(|col| format!("{}:{}", col.name, col.class.name()))
                .collect::<Vec<_>>()
                .join(",")
        );

        Ok(Self {
            natts: desc.natts(),
            columns,
            schema: Arc::new(Schema::new(fields)),
            type_string,
        })
    }

    /// Number of relation columns, stored or not.
    pub fn natts(&self) -> usize {
        self.natts
    }

    /// Stored columns in attribute order.
    pub fn columns(&self) -> &[StoredColumn] {
        &self.columns
    }

    /// Arrow schema of the stored columns.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Type string written to and checked against file metadata.
    pub fn type_string(&self) -> &str {
        &self.type_string
    }

    /// Physical column index of relation attribute `attno`.
    pub fn stored_index(&self, attno: usize) -> Option<usize> {
        self.columns.iter().position(|col| col.attno == attno)
    }
}

fn datum_to_long(datum: &Datum) -> Option<i64> {
    let value = match datum {
        Datum::Bool(v) => i64::from(*v),
        Datum::Char(v) => i64::from(*v),
        Datum::Int2(v) => i64::from(*v),
        Datum::Int4(v) | Datum::Date(v) => i64::from(*v),
        Datum::Int8(v) | Datum::Timestamp(v) => *v,
        Datum::Float4(v) => i64::from(v.to_bits()),
        Datum::Float8(v) => v.to_bits() as i64,
        Datum::Text(_) | Datum::Bytea(_) | Datum::Uuid(_) => return None,
    };
    Some(value)
}

fn long_to_datum(ty: ColumnType, value: i64) -> Result<Datum, FormatError> {
    let datum = match ty {
        ColumnType::Bool => Datum::Bool(value != 0),
        ColumnType::Char => Datum::Char(value as i8),
        ColumnType::Int2 => Datum::Int2(value as i16),
        ColumnType::Int4 => Datum::Int4(value as i32),
        ColumnType::Date => Datum::Date(value as i32),
        ColumnType::Int8 => Datum::Int8(value),
        ColumnType::Timestamp => Datum::Timestamp(value),
        ColumnType::Float4 => Datum::Float4(f32::from_bits(value as u32)),
        ColumnType::Float8 => Datum::Float8(f64::from_bits(value as u64)),
        other => {
            return Err(FormatError::Corrupt(format!(
                "long vector holds column of type {other}"
            )))
        }
    };
    Ok(datum)
}

fn datum_to_binary(datum: &Datum) -> Option<&[u8]> {
    match datum {
        Datum::Text(v) => Some(v.as_bytes()),
        Datum::Bytea(v) => Some(v),
        Datum::Uuid(v) => Some(v),
        _ => None,
    }
}

fn binary_to_datum(ty: ColumnType, bytes: &[u8]) -> Result<Datum, FormatError> {
    match ty {
        ColumnType::Text | ColumnType::Varchar | ColumnType::BpChar => {
            String::from_utf8(bytes.to_vec())
                .map(Datum::Text)
                .map_err(|e| FormatError::Corrupt(format!("invalid utf-8 text: {e}")))
        }
        ColumnType::Bytea => Ok(Datum::Bytea(bytes.to_vec())),
        ColumnType::Uuid => <[u8; 16]>::try_from(bytes)
            .map(Datum::Uuid)
            .map_err(|_| FormatError::Corrupt(format!("uuid of {} bytes", bytes.len()))),
        other => Err(FormatError::Corrupt(format!(
            "binary vector holds column of type {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attribute;

    #[test]
    fn derives_type_string_skipping_dropped() {
        let desc = TupleDesc::new(vec![
            Attribute::new("a", ColumnType::Int4),
            Attribute::new("gone", ColumnType::Text).dropped(),
            Attribute::new("b", ColumnType::Text),
            Attribute::new("c", ColumnType::Uuid),
        ]);
        let layout = ColumnLayout::derive(&desc).unwrap();
        assert_eq!(layout.type_string(), "struct<a:long,b:binary,c:binary>");
        assert_eq!(layout.natts(), 4);
        assert_eq!(layout.stored_index(2), Some(1));
        assert_eq!(layout.stored_index(1), None);
        assert_eq!(layout.schema().fields().len(), 3);
    }

    #[test]
    fn internal_type_is_rejected() {
        let desc = TupleDesc::new(vec![Attribute::new("x", ColumnType::Internal)]);
        assert!(matches!(
            ColumnLayout::derive(&desc),
            Err(FormatError::UnsupportedType { .. })
        ));
        // a dropped internal column is never stored
        let desc = TupleDesc::new(vec![Attribute::new("x", ColumnType::Internal).dropped()]);
        assert!(ColumnLayout::derive(&desc).is_ok());
    }

    #[test]
    fn long_encoding_keeps_float_bits() {
        let value = datum_to_long(&Datum::Float4(-1.5)).unwrap();
        assert_eq!(
            long_to_datum(ColumnType::Float4, value).unwrap(),
            Datum::Float4(-1.5)
        );
        let value = datum_to_long(&Datum::Float8(f64::NEG_INFINITY)).unwrap();
        assert_eq!(
            long_to_datum(ColumnType::Float8, value).unwrap(),
            Datum::Float8(f64::NEG_INFINITY)
        );
        let value = datum_to_long(&Datum::Int2(-7)).unwrap();
        assert_eq!(long_to_datum(ColumnType::Int2, value).unwrap(), Datum::Int2(-7));
    }

    #[test]
    fn corrupt_binary_is_reported() {
        assert!(binary_to_datum(ColumnType::Uuid, &[1, 2, 3]).is_err());
        assert!(binary_to_datum(ColumnType::Text, &[0xff, 0xfe]).is_err());
    }
}
