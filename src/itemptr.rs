//! Logical row addresses.
//!
//! A row is addressed by `(table_no, block_number, tuple_number)` packed into
//! the host's 48-bit row identifier made of three 16-bit words. The widths are
//! fixed: 5 bits of table number, 24 bits of block number and 18 bits of tuple
//! number. The low 15 bits of the tuple number live in the offset word, offset
//! by one so a valid pointer never carries offset zero.

use std::fmt;

/// Bits reserved for the table number.
pub const TABLE_NO_BITS: u32 = 5;
/// Bits reserved for the block number.
pub const BLOCK_NUMBER_BITS: u32 = 24;
/// Bits reserved for the tuple number.
pub const TUPLE_NUMBER_BITS: u32 = 18;

/// Largest table number representable in a pointer.
pub const MAX_TABLE_NO: u8 = (1 << TABLE_NO_BITS) - 1;
/// Largest block number representable in a pointer.
pub const MAX_BLOCK_NUMBER: u32 = (1 << BLOCK_NUMBER_BITS) - 1;
/// Largest tuple number representable in a pointer.
pub const MAX_TUPLE_NUMBER: u32 = (1 << TUPLE_NUMBER_BITS) - 1;

const OFFSET_BITS: u32 = 15;
const OFFSET_MASK: u32 = (1 << OFFSET_BITS) - 1;
const BLOCK_LO_BITS: u32 = 13;
const BLOCK_LO_MASK: u32 = (1 << BLOCK_LO_BITS) - 1;
const TUPLE_HI_BITS: u32 = 16 - BLOCK_LO_BITS;
const TUPLE_HI_MASK: u16 = (1 << TUPLE_HI_BITS) - 1;
const BLOCK_HI_MASK: u16 = (1 << (16 - TABLE_NO_BITS)) - 1;

/// Packed logical row address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ItemPointer {
    bi_hi: u16,
    bi_lo: u16,
    posid: u16,
}

impl ItemPointer {
    /// Pack a row address. Out-of-range inputs are truncated to their field
    /// widths.
    pub fn new(table_no: u8, block_number: u32, tuple_number: u32) -> Self {
        let table_no = u32::from(table_no) & u32::from(MAX_TABLE_NO);
        let block_number = block_number & MAX_BLOCK_NUMBER;
        let tuple_number = tuple_number & MAX_TUPLE_NUMBER;

        let bi_hi = (table_no << (16 - TABLE_NO_BITS)) | (block_number >> BLOCK_LO_BITS);
        let bi_lo = ((block_number & BLOCK_LO_MASK) << TUPLE_HI_BITS) | (tuple_number >> OFFSET_BITS);
        let posid = (tuple_number & OFFSET_MASK) + 1;
        Self {
            bi_hi: bi_hi as u16,
            bi_lo: bi_lo as u16,
            posid: posid as u16,
        }
    }

    /// Rebuild a pointer from the raw host words.
    pub const fn from_raw(bi_hi: u16, bi_lo: u16, posid: u16) -> Self {
        Self { bi_hi, bi_lo, posid }
    }

    /// The raw host words `(bi_hi, bi_lo, posid)`.
    pub const fn raw(&self) -> (u16, u16, u16) {
        (self.bi_hi, self.bi_lo, self.posid)
    }

    /// A pointer is valid when its offset word is non-zero.
    pub const fn is_valid(&self) -> bool {
        self.posid != 0
    }

    /// Table number of the relation.
    pub fn table_no(&self) -> u8 {
        (self.bi_hi >> (16 - TABLE_NO_BITS)) as u8
    }

    /// Block number within the relation.
    pub fn block_number(&self) -> u32 {
        (u32::from(self.bi_hi & BLOCK_HI_MASK) << BLOCK_LO_BITS)
            | u32::from(self.bi_lo >> TUPLE_HI_BITS)
    }

    /// Tuple number; meaningless on an invalid pointer.
    pub fn tuple_number(&self) -> u32 {
        (u32::from(self.posid).wrapping_sub(1) & OFFSET_MASK)
            + (u32::from(self.bi_lo & TUPLE_HI_MASK) << OFFSET_BITS)
    }

    /// Split the pointer back into `(table_no, block_number, tuple_number)`.
    pub fn decompose(&self) -> (u8, u32, u32) {
        (self.table_no(), self.block_number(), self.tuple_number())
    }
}

impl fmt::Debug for ItemPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.write_str("ItemPointer(invalid)");
        }
        write!(
            f,
            "ItemPointer({}, {}, {})",
            self.table_no(),
            self.block_number(),
            self.tuple_number()
        )
    }
}

impl fmt::Display for ItemPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{},{})",
            self.table_no(),
            self.block_number(),
            self.tuple_number()
        )
    }
}
