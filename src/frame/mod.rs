// ABOUTME: Frame header, per-type bodies, and the envelope that ties them together
// ABOUTME: `Frame::decode` is handed one already-length-delimited frame slice by the chunk reader

mod body;
mod header;

pub use body::{
    CallRequestBody, CallResponseBody, ErrorBody, InitBody, ResponseCode, INIT_VERSION,
};
pub use header::{FrameHeader, FrameType, FLAG_FRAGMENT, HEADER_LEN};

use bytes::{Buf, BytesMut};
use thiserror::Error;

use crate::checksum::ChecksumError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame declares size {0} which is smaller than the 16-byte header")]
    SizeTooSmall(u32),
    #[error("frame body truncated before its declared length")]
    Truncated,
    #[error("unknown frame type {0:#04x}")]
    InvalidFrameType(u8),
    #[error("frame body decode left {trailing} trailing byte(s) unconsumed")]
    ExtraFrameData { trailing: usize },
    #[error("{field} is {len} bytes, exceeding its length-prefix width")]
    FieldTooLong { field: &'static str, len: usize },
    #[error("missing required init header {0:?}")]
    MissingInitHeader(&'static str),
    #[error("duplicate init header {0:?}")]
    DuplicateInitHeader(&'static str),
    #[error("unknown init header {0:?}")]
    InvalidInitHeader(String),
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error(transparent)]
    Checksum(#[from] ChecksumError),
}

/// A frame's body, already decoded to its typed representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    InitRequest(InitBody),
    InitResponse(InitBody),
    CallRequest(CallRequestBody),
    CallResponse(CallResponseBody),
    Error(ErrorBody),
}

impl FrameBody {
    fn frame_type(&self) -> FrameType {
        match self {
            FrameBody::InitRequest(_) => FrameType::InitRequest,
            FrameBody::InitResponse(_) => FrameType::InitResponse,
            FrameBody::CallRequest(_) => FrameType::CallRequest,
            FrameBody::CallResponse(_) => FrameType::CallResponse,
            FrameBody::Error(_) => FrameType::Error,
        }
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        match self {
            FrameBody::InitRequest(b) | FrameBody::InitResponse(b) => b.encode(buf),
            FrameBody::CallRequest(b) => b.encode(buf),
            FrameBody::CallResponse(b) => b.encode(buf),
            FrameBody::Error(b) => b.encode(buf),
        }
    }
}

/// One complete protocol data unit: a connection-scoped id, flags, and a
/// typed body. Produced by [`crate::reader::ChunkReader`] feeding raw frame
/// slices into [`Frame::decode`]; consumed by [`Frame::encode`] on the way
/// back out to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: u32,
    pub flags: u8,
    pub body: FrameBody,
}

impl Frame {
    pub fn new(id: u32, flags: u8, body: FrameBody) -> Self {
        Self { id, flags, body }
    }

    /// Decode a complete frame (header + body) from a slice already
    /// isolated by the chunk reader — `raw.len()` equals the header's
    /// `size` field by construction.
    pub fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = raw;
        let header = FrameHeader::decode(&mut cursor)?;
        let body_start = raw.len() - cursor.remaining();
        let mut body_buf = &raw[body_start..];
        let body_len = body_buf.len();

        let frame_type = FrameType::try_from(header.frame_type)
            .map_err(|_| CodecError::InvalidFrameType(header.frame_type))?;

        let body = match frame_type {
            FrameType::InitRequest => FrameBody::InitRequest(InitBody::decode(&mut body_buf)?),
            FrameType::InitResponse => FrameBody::InitResponse(InitBody::decode(&mut body_buf)?),
            FrameType::CallRequest => {
                FrameBody::CallRequest(CallRequestBody::decode(&mut body_buf)?)
            }
            FrameType::CallResponse => {
                FrameBody::CallResponse(CallResponseBody::decode(&mut body_buf)?)
            }
            FrameType::Error => FrameBody::Error(ErrorBody::decode(&mut body_buf)?),
        };

        let consumed = body_len - body_buf.remaining();
        if consumed < body_len {
            return Err(CodecError::ExtraFrameData {
                trailing: body_len - consumed,
            });
        }

        Ok(Frame {
            id: header.id,
            flags: header.flags,
            body,
        })
    }

    /// Encode body first, then prefix with a header whose `size` reflects
    /// the body's actual encoded length.
    pub fn encode(&self) -> Result<BytesMut, CodecError> {
        let mut body_buf = BytesMut::new();
        self.body.encode(&mut body_buf)?;

        let size = HEADER_LEN as u32 + body_buf.len() as u32;
        let header = FrameHeader {
            size,
            id: self.id,
            frame_type: self.body.frame_type().into(),
            flags: self.flags,
        };

        let mut out = BytesMut::with_capacity(size as usize);
        header.encode(&mut out);
        out.unsplit(body_buf);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;
    use bytes::Bytes;

    fn sample_call_request(id: u32) -> Frame {
        Frame::new(
            id,
            0,
            FrameBody::CallRequest(CallRequestBody {
                ttl_ms: 1000,
                tracing: [0u8; 24],
                service: Bytes::from_static(b"svc"),
                headers: vec![],
                arg1: Bytes::from_static(b"echo"),
                arg2: Bytes::from_static(b"h"),
                arg3: Bytes::from_static(b"hello"),
                checksum: Checksum::none(),
            }),
        )
    }

    #[test]
    fn encode_decode_round_trips_call_request() {
        let frame = sample_call_request(7);
        let encoded = frame.encode().unwrap();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn encode_decode_round_trips_init() {
        let frame = Frame::new(
            1,
            0,
            FrameBody::InitRequest(InitBody::new("127.0.0.1:4040", "A[1]")),
        );
        let encoded = frame.encode().unwrap();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let mut raw = BytesMut::new();
        let header = FrameHeader {
            size: HEADER_LEN as u32,
            id: 1,
            frame_type: 0x42,
            flags: 0,
        };
        header.encode(&mut raw);
        let err = Frame::decode(&raw).unwrap_err();
        assert_eq!(err, CodecError::InvalidFrameType(0x42));
    }

    #[test]
    fn extra_frame_data_is_rejected() {
        let frame = sample_call_request(1);
        let mut encoded = frame.encode().unwrap();
        // declare 3 extra trailing bytes beyond the true body length
        let size = encoded.len() as u32 + 3;
        encoded[0..4].copy_from_slice(&size.to_be_bytes());
        encoded.extend_from_slice(&[0, 0, 0]);
        let err = Frame::decode(&encoded).unwrap_err();
        assert_eq!(err, CodecError::ExtraFrameData { trailing: 3 });
    }
}
