// ABOUTME: Append-and-consume byte queue shared by the chunk reader and frame codec
// ABOUTME: Wraps a growable BytesMut so appends are amortized O(1) and shifts are zero-copy

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Raised when a caller asks `shift`/`peek` for more bytes than are buffered.
///
/// Per the parse buffer contract, callers must gate on [`ParseBuffer::avail`]
/// before calling `shift`; hitting this error means that contract was
/// violated, not that the stream is malformed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("parse buffer underflow: requested {requested} bytes, {available} available")]
pub struct Underflow {
    pub requested: usize,
    pub available: usize,
}

/// Append-only byte queue with peek/shift primitives.
///
/// Frames and frame headers are parsed by peeking ahead to decide how much
/// data is needed, then shifting exactly that much off the front. `append`
/// is amortized O(1); `BytesMut` grows its backing allocation rather than
/// copying on every push.
#[derive(Debug, Default)]
pub struct ParseBuffer {
    inner: BytesMut,
}

impl ParseBuffer {
    pub fn new() -> Self {
        Self {
            inner: BytesMut::new(),
        }
    }

    /// Append freshly-read bytes to the tail of the buffer.
    pub fn append(&mut self, chunk: &[u8]) {
        self.inner.extend_from_slice(chunk);
    }

    /// Number of bytes currently buffered and not yet shifted off.
    pub fn avail(&self) -> usize {
        self.inner.len()
    }

    /// Borrow `nbytes` starting at `offset` without consuming them.
    ///
    /// Returns `None` if fewer than `offset + nbytes` bytes are buffered.
    pub fn peek(&self, offset: usize, nbytes: usize) -> Option<&[u8]> {
        let end = offset.checked_add(nbytes)?;
        (end <= self.inner.len()).then(|| &self.inner[offset..end])
    }

    /// Remove and return exactly `n` bytes from the front of the buffer.
    ///
    /// The caller must have already checked `avail() >= n`; if not, this
    /// returns [`Underflow`] rather than panicking.
    pub fn shift(&mut self, n: usize) -> Result<Bytes, Underflow> {
        if self.inner.len() < n {
            return Err(Underflow {
                requested: n,
                available: self.inner.len(),
            });
        }
        Ok(self.inner.split_to(n).freeze())
    }

    /// Discard `n` bytes from the front without returning them.
    pub fn advance(&mut self, n: usize) {
        self.inner.advance(n.min(self.inner.len()));
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_avail() {
        let mut buf = ParseBuffer::new();
        assert_eq!(buf.avail(), 0);
        buf.append(b"hello");
        assert_eq!(buf.avail(), 5);
        buf.append(b" world");
        assert_eq!(buf.avail(), 11);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut buf = ParseBuffer::new();
        buf.append(b"abcdef");
        assert_eq!(buf.peek(0, 3), Some(&b"abc"[..]));
        assert_eq!(buf.peek(3, 3), Some(&b"def"[..]));
        assert_eq!(buf.avail(), 6);
        assert_eq!(buf.peek(4, 10), None);
    }

    #[test]
    fn shift_consumes_exactly_n() {
        let mut buf = ParseBuffer::new();
        buf.append(b"abcdef");
        let first = buf.shift(3).unwrap();
        assert_eq!(&first[..], b"abc");
        assert_eq!(buf.avail(), 3);
        let second = buf.shift(3).unwrap();
        assert_eq!(&second[..], b"def");
        assert_eq!(buf.avail(), 0);
    }

    #[test]
    fn shift_more_than_available_is_underflow() {
        let mut buf = ParseBuffer::new();
        buf.append(b"ab");
        let err = buf.shift(5).unwrap_err();
        assert_eq!(
            err,
            Underflow {
                requested: 5,
                available: 2
            }
        );
        // underflow does not consume anything
        assert_eq!(buf.avail(), 2);
    }

    #[test]
    fn append_interleaved_with_shift() {
        let mut buf = ParseBuffer::new();
        buf.append(b"ab");
        buf.append(b"cd");
        assert_eq!(&buf.shift(1).unwrap()[..], b"a");
        buf.append(b"ef");
        assert_eq!(&buf.shift(5).unwrap()[..], b"bcdef");
        assert!(buf.is_empty());
    }
}
