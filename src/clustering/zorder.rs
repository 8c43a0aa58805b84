//! Z-order key construction.
//!
//! Every key column is mapped to an 8 byte string whose unsigned byte order
//! matches the column's value order, then the strings are bit-interleaved
//! into one composite key.

use std::cmp::Ordering;

use crate::types::{ColumnType, Datum};

/// Width of the per-column byte string.
pub const N_BYTES: usize = 8;
/// Upper bound on Z-order key columns.
pub const MAX_ZORDER_KEYS: usize = 32;
/// Name of the hidden column carrying the composite key.
pub const ZORDER_COLUMN_NAME: &str = "zorder_value";

const SIGN_BIT: u64 = 1 << 63;

/// Column types that have an order-preserving byte encoding.
pub fn is_zorder_type(ty: ColumnType) -> bool {
    matches!(
        ty,
        ColumnType::Bool
            | ColumnType::Char
            | ColumnType::Int2
            | ColumnType::Int4
            | ColumnType::Int8
            | ColumnType::Float4
            | ColumnType::Float8
            | ColumnType::Varchar
            | ColumnType::BpChar
            | ColumnType::Text
            | ColumnType::Bytea
            | ColumnType::Date
    )
}

fn int8_to_bytes(value: i64) -> [u8; N_BYTES] {
    ((value as u64) ^ SIGN_BIT).to_be_bytes()
}

fn float8_to_bytes(value: f64) -> [u8; N_BYTES] {
    let bits = value.to_bits() as i64;
    // positives flip the sign bit, negatives flip every bit
    let flipped = bits ^ ((bits >> 63) | i64::MIN);
    flipped.to_be_bytes()
}

fn varlena_to_bytes(value: &[u8]) -> [u8; N_BYTES] {
    let mut out = [0u8; N_BYTES];
    let len = value.len().min(N_BYTES);
    out[..len].copy_from_slice(&value[..len]);
    out
}

/// Order-preserving 8 byte encoding of one key value; null encodes as zeros.
///
/// Returns `None` for datums without a Z-order encoding (timestamps, uuids).
pub fn datum_to_bytes(value: Option<&Datum>) -> Option<[u8; N_BYTES]> {
    let Some(value) = value else {
        return Some([0u8; N_BYTES]);
    };
    let bytes = match value {
        Datum::Bool(v) => int8_to_bytes(i64::from(*v)),
        Datum::Char(v) => int8_to_bytes(i64::from(*v)),
        Datum::Int2(v) => int8_to_bytes(i64::from(*v)),
        Datum::Int4(v) | Datum::Date(v) => int8_to_bytes(i64::from(*v)),
        Datum::Int8(v) => int8_to_bytes(*v),
        Datum::Float4(v) => float8_to_bytes(f64::from(*v)),
        Datum::Float8(v) => float8_to_bytes(*v),
        Datum::Text(v) => varlena_to_bytes(v.as_bytes()),
        Datum::Bytea(v) => varlena_to_bytes(v),
        Datum::Timestamp(_) | Datum::Uuid(_) => return None,
    };
    Some(bytes)
}

/// Unsigned lexicographic comparison of two composite keys.
pub fn bytes_compare(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// Interleave `src`, the concatenation of `ncolumns` 8 byte strings, into
/// `result`. Bit `b` of column `i` lands on output bit `b * ncolumns + i`,
/// bits counted most significant first within each byte.
pub fn interleave_bits(src: &[u8], result: &mut [u8], ncolumns: usize) {
    debug_assert!(src.len() >= ncolumns * N_BYTES);
    debug_assert!(result.len() >= ncolumns * N_BYTES);
    for bit in 0..N_BYTES * 8 {
        let byte_pos = bit / 8;
        let bit_pos = bit % 8;
        for column in 0..ncolumns {
            let src_bit = (src[column * N_BYTES + byte_pos] >> (7 - bit_pos)) & 1;
            let out = bit * ncolumns + column;
            result[out / 8] |= src_bit << (7 - out % 8);
        }
    }
}

/// Reusable builder of composite Z-order keys.
#[derive(Debug, Clone)]
pub struct ZOrderKeyBuilder {
    columns: Vec<usize>,
    buffer: Vec<u8>,
}

impl ZOrderKeyBuilder {
    /// `columns` are the attribute indexes of the key, in key order.
    pub fn new(columns: Vec<usize>) -> Self {
        let buffer = vec![0u8; columns.len() * N_BYTES];
        Self { columns, buffer }
    }

    /// Number of key columns.
    pub fn num_keys(&self) -> usize {
        self.columns.len()
    }

    /// Composite key of `values`. `None` when a key column holds a datum
    /// without an encoding.
    pub fn build(&mut self, values: &[Option<Datum>]) -> Option<Vec<u8>> {
        for (i, column) in self.columns.iter().enumerate() {
            let value = values.get(*column).and_then(Option::as_ref);
            let bytes = datum_to_bytes(value)?;
            self.buffer[i * N_BYTES..(i + 1) * N_BYTES].copy_from_slice(&bytes);
        }
        let mut key = vec![0u8; self.buffer.len()];
        interleave_bits(&self.buffer, &mut key, self.columns.len());
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_le(bytes: &[u8]) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(word)
    }

    fn encode(value: Datum) -> [u8; N_BYTES] {
        datum_to_bytes(Some(&value)).unwrap()
    }

    #[test]
    fn int4_reference_vectors() {
        assert_eq!(as_le(&encode(Datum::Int4(0))), 0x0000000000000080);
        assert_eq!(as_le(&encode(Datum::Int4(1))), 0x0100000000000080);
        assert_eq!(as_le(&encode(Datum::Int4(-1))), 0xffffffffffffff7f);
    }

    #[test]
    fn integer_order_is_byte_order() {
        let mut rng = fastrand::Rng::with_seed(11);
        for _ in 0..1000 {
            let a = rng.i64(..);
            let b = rng.i64(..);
            assert_eq!(
                bytes_compare(&encode(Datum::Int8(a)), &encode(Datum::Int8(b))),
                a.cmp(&b),
                "{a} vs {b}"
            );
        }
        assert_eq!(
            bytes_compare(&encode(Datum::Int2(i16::MIN)), &encode(Datum::Int2(i16::MAX))),
            Ordering::Less
        );
        assert_eq!(
            bytes_compare(&encode(Datum::Bool(false)), &encode(Datum::Bool(true))),
            Ordering::Less
        );
    }

    #[test]
    fn float_total_order() {
        let ordered = [
            f64::NEG_INFINITY,
            f64::MIN,
            -100.0,
            -1.0,
            0.0,
            1.9,
            23.24,
            203.14,
            f64::MAX,
            f64::INFINITY,
            f64::NAN,
        ];
        for pair in ordered.windows(2) {
            assert_eq!(
                bytes_compare(&encode(Datum::Float8(pair[0])), &encode(Datum::Float8(pair[1]))),
                Ordering::Less,
                "{} < {}",
                pair[0],
                pair[1]
            );
        }
        for pair in ordered.windows(2) {
            assert_eq!(
                bytes_compare(
                    &encode(Datum::Float4(pair[0] as f32)),
                    &encode(Datum::Float4(pair[1] as f32))
                ),
                // the f64 extremes narrow to infinities
                if pair[0] as f32 == pair[1] as f32 {
                    Ordering::Equal
                } else {
                    Ordering::Less
                }
            );
        }
    }

    #[test]
    fn strings_truncate_and_pad() {
        assert_eq!(encode(Datum::Text("ab".into())), *b"ab\0\0\0\0\0\0");
        assert_eq!(
            encode(Datum::Bytea(b"abcdefghij".to_vec())),
            *b"abcdefgh"
        );
        assert_eq!(datum_to_bytes(None), Some([0u8; N_BYTES]));
        assert_eq!(datum_to_bytes(Some(&Datum::Uuid([1; 16]))), None);
    }

    #[test]
    fn interleaves_two_columns() {
        let mut src = Vec::new();
        src.extend_from_slice(&encode(Datum::Int4(0)));
        src.extend_from_slice(&encode(Datum::Int4(-1)));
        let mut result = [0u8; 2 * N_BYTES];
        interleave_bits(&src, &mut result, 2);
        assert_eq!(as_le(&result[..8]), 0x5555555555555595);
        assert_eq!(as_le(&result[8..]), 0x5555555555555555);
    }

    #[test]
    fn single_column_is_identity() {
        let src = encode(Datum::Int8(123_456));
        let mut result = [0u8; N_BYTES];
        interleave_bits(&src, &mut result, 1);
        assert_eq!(result, src);
    }

    #[test]
    fn builder_reads_key_columns() {
        let mut builder = ZOrderKeyBuilder::new(vec![1, 0]);
        let key = builder
            .build(&[Some(Datum::Int4(-1)), Some(Datum::Int4(0))])
            .unwrap();
        assert_eq!(as_le(&key[..8]), 0x5555555555555595);
        assert_eq!(builder.num_keys(), 2);
        assert!(builder.build(&[Some(Datum::Uuid([0; 16])), None]).is_none());
    }
}
