use super::FormatError;

/// Largest number of bytes one scratch buffer may hold. Binary column offsets
/// are 32-bit.
pub const MAX_SCRATCH_BYTES: usize = i32::MAX as usize;

const DEFAULT_SCRATCH_BYTES: usize = 8 * 1024;

/// Growable byte arena holding the variable-length payloads of one column
/// until the batch is flushed.
///
/// Capacity doubles on overflow and never exceeds [`MAX_SCRATCH_BYTES`].
#[derive(Debug)]
pub struct ScratchBuffer {
    buf: Vec<u8>,
    offset: usize,
}

impl ScratchBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SCRATCH_BYTES)
    }

    /// Empty buffer able to hold `capacity` bytes without growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity.min(MAX_SCRATCH_BYTES)],
            offset: 0,
        }
    }

    /// Bytes in use.
    pub fn len(&self) -> usize {
        self.offset
    }

    /// Whether nothing was written.
    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    /// Bytes the buffer holds before growing.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Whether `extra` more bytes fit without passing the maximum.
    pub fn can_fit(&self, extra: usize) -> bool {
        self.offset
            .checked_add(extra)
            .is_some_and(|end| end <= MAX_SCRATCH_BYTES)
    }

    /// Copy `bytes` in and return the end offset.
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize, FormatError> {
        if !self.can_fit(bytes.len()) {
            return Err(FormatError::ValueTooLarge(bytes.len()));
        }
        let end = self.offset + bytes.len();
        if end > self.buf.len() {
            self.grow(end);
        }
        self.buf[self.offset..end].copy_from_slice(bytes);
        self.offset = end;
        Ok(end)
    }

    fn grow(&mut self, required: usize) {
        let mut capacity = self.buf.len().max(1);
        while capacity < required {
            capacity = capacity.saturating_mul(2);
        }
        self.buf.resize(capacity.min(MAX_SCRATCH_BYTES), 0);
    }

    /// Bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.offset]
    }

    /// Forget the content, keeping capacity.
    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

impl Default for ScratchBuffer {
    fn default() -> Self {
        Self::new()
    }
}
