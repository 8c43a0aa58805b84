//! Identifiers of micro-partition files.

use std::{
    fmt,
    str::FromStr,
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

/// Length of the textual form of a [`BlockId`].
pub const BLOCK_ID_LEN: usize = 36;

/// Stable external identifier of one micro-partition file.
///
/// Rendered as a hyphenated 8-4-4-4-12 hex string so it fits the 36 character
/// slot the catalog reserves for block names.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId([u8; 16]);

impl BlockId {
    /// Draw a fresh random identifier.
    pub fn random() -> Self {
        Self(Ulid::new().to_bytes())
    }

    /// Build an identifier from its raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of the identifier.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({self})")
    }
}

/// Error returned when parsing a malformed block id string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid block id: {0:?}")]
pub struct ParseBlockIdError(pub String);

impl FromStr for BlockId {
    type Err = ParseBlockIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseBlockIdError(s.to_string());
        if s.len() != BLOCK_ID_LEN {
            return Err(err());
        }
        let bytes = s.as_bytes();
        for pos in [8, 13, 18, 23] {
            if bytes[pos] != b'-' {
                return Err(err());
            }
        }
        let digits: Vec<u8> = bytes.iter().copied().filter(|b| *b != b'-').collect();
        if digits.len() != 32 {
            return Err(err());
        }
        let mut out = [0u8; 16];
        for (i, pair) in digits.chunks_exact(2).enumerate() {
            let hi = hex_value(pair[0]).ok_or_else(err)?;
            let lo = hex_value(pair[1]).ok_or_else(err)?;
            out[i] = (hi << 4) | lo;
        }
        Ok(Self(out))
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Thread-safe generator for block identifiers scoped to one storage engine.
///
/// Identifiers are monotonic within one process which keeps freshly written
/// partitions sorted by creation time in directory listings.
pub struct BlockIdGenerator {
    inner: Mutex<Generator>,
}

impl BlockIdGenerator {
    /// Create a new generator seeded with the current time.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }

    /// Produce the next [`BlockId`].
    pub fn generate(&self) -> BlockId {
        let mut guard = self
            .inner
            .lock()
            .expect("block id generator mutex should not be poisoned");
        match guard.generate() {
            Ok(ulid) => BlockId(ulid.to_bytes()),
            // random bits exhausted within one millisecond
            Err(_) => BlockId::random(),
        }
    }
}

impl Default for BlockIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BlockIdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockIdGenerator").finish_non_exhaustive()
    }
}
