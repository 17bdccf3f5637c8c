// ABOUTME: The fixed 16-byte frame header shared by every frame type

use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::CodecError;

pub const HEADER_LEN: usize = 16;
const RESERVED_LEN: usize = 6;

/// `Fragment` bit: round-trips through encode/decode, never interpreted —
/// message fragmentation across frames is not implemented by this core.
pub const FLAG_FRAGMENT: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameType {
    InitRequest = 0x01,
    InitResponse = 0x02,
    CallRequest = 0x03,
    CallResponse = 0x04,
    Error = 0xFF,
}

/// `0..4 size:u32be, 4..8 id:u32be, 8 type:u8, 9 flags:u8, 10..16 reserved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub size: u32,
    pub id: u32,
    pub frame_type: u8,
    pub flags: u8,
}

impl FrameHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.size);
        buf.put_u32(self.id);
        buf.put_u8(self.frame_type);
        buf.put_u8(self.flags);
        buf.put_slice(&[0u8; RESERVED_LEN]);
    }

    /// Reserved bytes are ignored on read; `size < HEADER_LEN` is rejected
    /// here rather than left for the chunk reader to discover downstream.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, CodecError> {
        if buf.remaining() < HEADER_LEN {
            return Err(CodecError::Truncated);
        }
        let size = buf.get_u32();
        let id = buf.get_u32();
        let frame_type = buf.get_u8();
        let flags = buf.get_u8();
        buf.advance(RESERVED_LEN);
        if size < HEADER_LEN as u32 {
            return Err(CodecError::SizeTooSmall(size));
        }
        Ok(Self {
            size,
            id,
            frame_type,
            flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = FrameHeader {
            size: 42,
            id: 7,
            frame_type: FrameType::CallRequest.into(),
            flags: FLAG_FRAGMENT,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        let decoded = FrameHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn reserved_bytes_are_zero_on_write() {
        let header = FrameHeader {
            size: 16,
            id: 1,
            frame_type: FrameType::InitRequest.into(),
            flags: 0,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(&buf[10..16], &[0u8; 6]);
    }

    #[test]
    fn size_below_header_len_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(15);
        buf.put_u32(1);
        buf.put_u8(FrameType::InitRequest.into());
        buf.put_u8(0);
        buf.put_slice(&[0u8; 6]);
        let err = FrameHeader::decode(&mut buf.freeze()).unwrap_err();
        assert_eq!(err, CodecError::SizeTooSmall(15));
    }

    #[test]
    fn truncated_header_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(16);
        let err = FrameHeader::decode(&mut buf.freeze()).unwrap_err();
        assert_eq!(err, CodecError::Truncated);
    }

    #[test]
    fn frame_type_try_from_rejects_unknown() {
        assert!(FrameType::try_from(0x42u8).is_err());
        assert_eq!(FrameType::try_from(0x03u8).unwrap(), FrameType::CallRequest);
    }
}
