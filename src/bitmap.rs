//! Growable per-block deletion bitmap.

use crate::itemptr::MAX_TUPLE_NUMBER;

/// Bits allocated by [`DynamicBitmap::new`].
pub const DEFAULT_BITMAP_BITS: u32 = 1024;

/// Upper bound on the number of bits a bitmap will grow to. One bit per
/// addressable tuple number.
pub const MAX_BITMAP_BITS: u32 = MAX_TUPLE_NUMBER + 1;

const WORD_BITS: u32 = u64::BITS;

/// Bit vector with one bit per tuple number of a micro-partition.
///
/// Growth is explicit: callers [`resize`](Self::resize) or use
/// [`grow_to_fit`](Self::grow_to_fit) before setting a bit beyond
/// [`num_bits`](Self::num_bits). Growing zero-extends and never loses set bits.
#[derive(Clone, PartialEq, Eq)]
pub struct DynamicBitmap {
    words: Vec<u64>,
    num_bits: u32,
}

impl DynamicBitmap {
    /// Empty bitmap with no storage.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BITMAP_BITS)
    }

    /// Empty bitmap able to hold `num_bits` without growing.
    pub fn with_capacity(num_bits: u32) -> Self {
        let num_bits = num_bits.min(MAX_BITMAP_BITS);
        Self {
            words: vec![0; words_for(num_bits)],
            num_bits,
        }
    }

    /// Current capacity in bits.
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Resize to exactly `num_bits` (capped at [`MAX_BITMAP_BITS`]). Bits past
    /// the new size are dropped when shrinking.
    pub fn resize(&mut self, num_bits: u32) {
        let num_bits = num_bits.min(MAX_BITMAP_BITS);
        if num_bits < self.num_bits {
            for index in num_bits..self.num_bits {
                self.clear(index);
            }
        }
        self.words.resize(words_for(num_bits), 0);
        self.num_bits = num_bits;
    }

    /// Double capacity until `index` fits. Returns `false` when `index` is past
    /// [`MAX_BITMAP_BITS`].
    pub fn grow_to_fit(&mut self, index: u32) -> bool {
        if index < self.num_bits {
            return true;
        }
        if index >= MAX_BITMAP_BITS {
            return false;
        }
        let mut target = self.num_bits.max(1);
        while target <= index {
            target = target.saturating_mul(2);
        }
        self.resize(target);
        true
    }

    /// Set bit `index`. Idempotent. Indexes past capacity are ignored; grow
    /// first.
    pub fn set(&mut self, index: u32) {
        debug_assert!(index < self.num_bits, "bitmap set past capacity");
        if index < self.num_bits {
            let (word, mask) = locate(index);
            self.words[word] |= mask;
        }
    }

    /// Clear bit `index`; a no-op past the capacity.
    pub fn clear(&mut self, index: u32) {
        if index < self.num_bits {
            let (word, mask) = locate(index);
            self.words[word] &= !mask;
        }
    }

    /// Whether bit `index` is set. Bits past capacity read as unset.
    pub fn test(&self, index: u32) -> bool {
        if index >= self.num_bits {
            return false;
        }
        let (word, mask) = locate(index);
        self.words[word] & mask != 0
    }

    /// Clear every bit, keeping capacity.
    pub fn reset(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// First index at or after `offset` whose bit equals `value`.
    pub fn find_first(&self, offset: u32, value: bool) -> Option<u32> {
        (offset..self.num_bits).find(|&i| self.test(i) == value)
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Iterate the indexes of set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros();
                rest &= rest - 1;
                Some(word_idx as u32 * WORD_BITS + bit)
            })
        })
    }
}

impl Default for DynamicBitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DynamicBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicBitmap")
            .field("num_bits", &self.num_bits)
            .field("ones", &self.count_ones())
            .finish()
    }
}

fn words_for(num_bits: u32) -> usize {
    num_bits.div_ceil(WORD_BITS) as usize
}

fn locate(index: u32) -> (usize, u64) {
    ((index / WORD_BITS) as usize, 1u64 << (index % WORD_BITS))
}
