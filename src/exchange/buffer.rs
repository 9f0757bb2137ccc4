//! Reusable byte buffer passed through a [`super::BufferProducer`] / [`super::BufferConsumer`] pair.

use super::ExchangeError;

/// An owned byte region with a valid length and a read cursor.
///
/// Allocated capacity never changes after construction: a buffer that is too
/// small for a write is dropped and replaced, not grown. A buffer with zero
/// valid bytes is the end-of-stream marker.
#[derive(Debug, Default)]
pub struct AudioBuffer {
    buf: Vec<u8>,
    bytes: usize,
    cur_offset: usize,
}

impl AudioBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes.
    ///
    /// Allocation failure is reported instead of aborting the process.
    pub fn with_capacity(capacity: usize) -> Result<Self, ExchangeError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| ExchangeError::Alloc(capacity))?;
        buf.resize(capacity, 0);
        Ok(Self {
            buf,
            bytes: 0,
            cur_offset: 0,
        })
    }

    /// The end-of-stream marker
    pub fn eof() -> Self {
        Self::default()
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// True for the zero-length end-of-stream marker
    pub fn is_eof(&self) -> bool {
        self.bytes == 0
    }

    /// Copy `data` into the buffer, replacing its content and rewinding the
    /// read cursor. Returns false (leaving the buffer untouched) if `data`
    /// does not fit in the allocated capacity.
    pub fn fill(&mut self, data: &[u8]) -> bool {
        if data.len() > self.buf.len() {
            return false;
        }
        self.buf[..data.len()].copy_from_slice(data);
        self.bytes = data.len();
        self.cur_offset = 0;
        true
    }

    /// Bytes not yet consumed by the reader
    pub fn remaining(&self) -> &[u8] {
        &self.buf[self.cur_offset..self.bytes]
    }

    /// Advance the read cursor, saturating at the valid length.
    pub fn consume(&mut self, count: usize) {
        self.cur_offset = (self.cur_offset + count).min(self.bytes);
    }

    /// Forget the content but keep the allocation.
    pub fn clear(&mut self) {
        self.bytes = 0;
        self.cur_offset = 0;
    }

    /// Start of the allocation (stable for the buffer's lifetime)
    pub fn as_ptr(&self) -> *const u8 {
        self.buf.as_ptr()
    }
}
