//! Chunked input buffering and line splitting.
//!
//! Input is read in large chunks and carved into newline-terminated units.
//! A unit is only deliverable once its terminator has been read, with one
//! exception: at end of input, a trailing fragment with no newline becomes
//! the final unit, byte-exact. No terminator is ever synthesized.

use std::io::{ErrorKind, Read};
use std::ops::Range;

use memchr::memchr;

use crate::error::{LinefanError, Result};

/// Outcome of one refill attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refill {
    /// Bytes were appended to the buffer.
    Data(usize),
    /// The source reported end of input (zero-byte read).
    Eof,
    /// The source is non-blocking and has nothing to give right now.
    NotReady,
    /// A signal interrupted the read; the caller should service its flags
    /// and come back.
    Interrupted,
}

/// Buffer that accumulates raw input and yields line units.
///
/// Consumed bytes are tracked by a cursor and reclaimed lazily: the next
/// refill compacts the buffer before appending. Ranges returned by
/// [`peek_unit`](Self::peek_unit) are valid until the next `advance` or
/// `refill` call.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    start: usize,
    eof: bool,
    chunk_size: usize,
}

impl LineBuffer {
    /// Create a buffer that refills in chunks of `chunk_size` bytes.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        debug_assert!(chunk_size > 0);
        Self {
            buf: Vec::new(),
            start: 0,
            eof: false,
            chunk_size,
        }
    }

    /// Whether every buffered byte has been consumed.
    pub fn is_drained(&self) -> bool {
        self.start == self.buf.len()
    }

    /// Whether the source has reported end of input.
    pub fn at_eof(&self) -> bool {
        self.eof
    }

    /// Find the next deliverable unit without consuming it.
    ///
    /// Returns the range of the next newline-terminated unit, terminator
    /// included. After end of input, a trailing unterminated fragment is
    /// returned as-is. `None` means more input is needed (or the buffer is
    /// drained).
    pub fn peek_unit(&self) -> Option<Range<usize>> {
        if self.is_drained() {
            return None;
        }
        match memchr(b'\n', &self.buf[self.start..]) {
            Some(pos) => Some(self.start..self.start + pos + 1),
            None if self.eof => Some(self.start..self.buf.len()),
            None => None,
        }
    }

    /// Borrow the bytes of a range returned by [`peek_unit`](Self::peek_unit).
    pub fn slice(&self, range: &Range<usize>) -> &[u8] {
        &self.buf[range.clone()]
    }

    /// Mark `n` bytes as consumed, starting at the cursor.
    ///
    /// Partial advances are allowed: a short write consumes only what was
    /// delivered, and the next [`peek_unit`](Self::peek_unit) yields the
    /// remainder of the same unit.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.start + n <= self.buf.len());
        self.start += n;
    }

    /// Read one chunk from `input` and append it to the buffer.
    ///
    /// Performs exactly one read so that signals and non-blocking sources
    /// surface promptly instead of being absorbed by a retry loop.
    pub fn refill<R: Read>(&mut self, input: &mut R) -> Result<Refill> {
        if self.eof {
            return Ok(Refill::Eof);
        }

        // Reclaim the consumed prefix before growing.
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }

        let old_len = self.buf.len();
        self.buf.resize(old_len + self.chunk_size, 0);
        match input.read(&mut self.buf[old_len..]) {
            Ok(0) => {
                self.buf.truncate(old_len);
                self.eof = true;
                Ok(Refill::Eof)
            }
            Ok(n) => {
                self.buf.truncate(old_len + n);
                Ok(Refill::Data(n))
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                self.buf.truncate(old_len);
                Ok(Refill::Interrupted)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.buf.truncate(old_len);
                Ok(Refill::NotReady)
            }
            Err(e) => {
                self.buf.truncate(old_len);
                Err(LinefanError::InputRead(e))
            }
        }
    }
}
