// ABOUTME: Two-state FSM turning a byte stream into discrete frame slices
// ABOUTME: Feed chunks of any size via `push`; `next_frame` drains what's ready

use bytes::Bytes;
use thiserror::Error;

use crate::buffer::ParseBuffer;

const LENGTH_PREFIX_WIDTH: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReaderError {
    #[error("zero-length frame at offset 0 of a fresh length field")]
    ZeroLengthFrame,
    #[error("end of stream with {residual} buffered byte(s) in state {state:?}")]
    TruncatedRead { residual: usize, state: ReaderState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    PendingLength,
    Seeking,
}

/// Chunk reader: a 2-state FSM over a [`ParseBuffer`]. `PendingLength`
/// reads the next big-endian length prefix; `Seeking` waits for that many
/// bytes to accumulate, then yields one raw frame slice (header + body,
/// the full `size` bytes including the length prefix itself).
///
/// Supports 1/2/4-byte length prefixes for generality; TChannel v2 always
/// uses 4.
pub struct ChunkReader {
    buffer: ParseBuffer,
    state: ReaderState,
    expecting: usize,
    prefix_width: usize,
}

impl Default for ChunkReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkReader {
    pub fn new() -> Self {
        Self::with_prefix_width(LENGTH_PREFIX_WIDTH)
    }

    pub fn with_prefix_width(prefix_width: usize) -> Self {
        assert!(
            matches!(prefix_width, 1 | 2 | 4),
            "length-prefix width must be 1, 2, or 4 bytes"
        );
        Self {
            buffer: ParseBuffer::new(),
            state: ReaderState::PendingLength,
            expecting: prefix_width,
            prefix_width,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Feed a chunk of freshly-read bytes. Frames become available via
    /// repeated calls to [`Self::next_frame`].
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.append(chunk);
    }

    fn read_length_prefix(&self) -> Option<u32> {
        let bytes = self.buffer.peek(0, self.prefix_width)?;
        Some(match self.prefix_width {
            1 => bytes[0] as u32,
            2 => u16::from_be_bytes([bytes[0], bytes[1]]) as u32,
            4 => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            _ => unreachable!(),
        })
    }

    /// Drain one frame from the buffer, if a complete one is available.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A zero-length frame
    /// is reported as an error and the FSM resynchronizes on the bytes
    /// that follow, per the framing partition-invariance property.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, ReaderError> {
        loop {
            match self.state {
                ReaderState::PendingLength => {
                    if self.buffer.avail() < self.prefix_width {
                        return Ok(None);
                    }
                    let size = self.read_length_prefix().expect("checked avail above");
                    if size == 0 {
                        self.buffer.advance(self.prefix_width);
                        return Err(ReaderError::ZeroLengthFrame);
                    }
                    self.expecting = size as usize;
                    self.state = ReaderState::Seeking;
                }
                ReaderState::Seeking => {
                    if self.buffer.avail() < self.expecting {
                        return Ok(None);
                    }
                    let frame = self
                        .buffer
                        .shift(self.expecting)
                        .expect("checked avail above");
                    self.expecting = self.prefix_width;
                    self.state = ReaderState::PendingLength;
                    return Ok(Some(frame));
                }
            }
        }
    }

    /// Drain every complete frame currently available, short-circuiting on
    /// the first error (a zero-length frame is still yielded via the error
    /// path and parsing may continue with a fresh call).
    pub fn drain(&mut self) -> Result<Vec<Bytes>, ReaderError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Signal end-of-stream: if bytes remain buffered, that's a truncated
    /// read.
    pub fn finish(&self) -> Result<(), ReaderError> {
        if self.buffer.avail() > 0 {
            return Err(ReaderError::TruncatedRead {
                residual: self.buffer.avail(),
                state: self.state,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_frame(payload: &[u8]) -> Vec<u8> {
        let size = (4 + payload.len()) as u32;
        let mut out = size.to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn reads_single_frame_fed_all_at_once() {
        let frame_bytes = encode_frame(b"hello");
        let mut reader = ChunkReader::new();
        reader.push(&frame_bytes);
        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(&frame[..], &frame_bytes[..]);
        assert_eq!(reader.next_frame().unwrap(), None);
    }

    #[test]
    fn reads_multiple_frames_concatenated() {
        let a = encode_frame(b"one");
        let b = encode_frame(b"two-longer");
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let mut reader = ChunkReader::new();
        reader.push(&stream);
        let frames = reader.drain().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], &a[..]);
        assert_eq!(&frames[1][..], &b[..]);
    }

    #[test]
    fn partition_invariance_byte_at_a_time_matches_all_at_once() {
        let a = encode_frame(b"one");
        let b = encode_frame(b"a slightly longer payload here");
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let mut whole = ChunkReader::new();
        whole.push(&stream);
        let whole_frames = whole.drain().unwrap();

        let mut byte_at_a_time = ChunkReader::new();
        let mut streamed_frames = Vec::new();
        for byte in &stream {
            byte_at_a_time.push(std::slice::from_ref(byte));
            streamed_frames.extend(byte_at_a_time.drain().unwrap());
        }

        assert_eq!(whole_frames, streamed_frames);
    }

    #[test]
    fn partition_invariance_random_chunk_sizes_matches_all_at_once() {
        let a = encode_frame(b"one");
        let b = encode_frame(b"two");
        let c = encode_frame(b"a third, somewhat longer frame payload");
        let mut stream = a.clone();
        stream.extend_from_slice(&b);
        stream.extend_from_slice(&c);

        let mut whole = ChunkReader::new();
        whole.push(&stream);
        let whole_frames = whole.drain().unwrap();

        for chunk_size in [1usize, 2, 3, 5, 7, 11, 100] {
            let mut reader = ChunkReader::new();
            let mut frames = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                reader.push(chunk);
                frames.extend(reader.drain().unwrap());
            }
            assert_eq!(frames, whole_frames, "mismatch at chunk size {chunk_size}");
        }
    }

    #[test]
    fn zero_length_frame_errors_then_resyncs() {
        let mut stream = vec![0u8, 0, 0, 0];
        let good = encode_frame(b"after the zero frame");
        stream.extend_from_slice(&good);

        let mut reader = ChunkReader::new();
        reader.push(&stream);
        assert_eq!(reader.next_frame().unwrap_err(), ReaderError::ZeroLengthFrame);
        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(&frame[..], &good[..]);
    }

    #[test]
    fn truncated_stream_reports_residual_and_state() {
        let mut reader = ChunkReader::new();
        reader.push(&10u32.to_be_bytes());
        reader.push(b"ab"); // declares 10 total, only 6 bytes ever arrive
        assert_eq!(reader.next_frame().unwrap(), None);
        let err = reader.finish().unwrap_err();
        assert_eq!(
            err,
            ReaderError::TruncatedRead {
                residual: 6,
                state: ReaderState::Seeking,
            }
        );
    }
}
