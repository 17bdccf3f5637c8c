// ABOUTME: Per-frame-type body grammars: Init, CallRequest, CallResponse, Error
// ABOUTME: `~k` fields are k-byte big-endian length prefix followed by raw bytes

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::checksum::Checksum;

use super::CodecError;

pub const INIT_VERSION: u16 = 2;
const TRACING_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ResponseCode {
    Ok = 0x00,
    Timeout = 0x01,
    Cancelled = 0x02,
    Busy = 0x03,
    SocketErrorNoRetries = 0x04,
    SocketError = 0x05,
    AppException = 0x06,
}

fn get_lp1(buf: &mut impl Buf) -> Result<Bytes, CodecError> {
    if !buf.has_remaining() {
        return Err(CodecError::Truncated);
    }
    let len = buf.get_u8() as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    Ok(buf.copy_to_bytes(len))
}

fn get_lp2(buf: &mut impl Buf) -> Result<Bytes, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Truncated);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    Ok(buf.copy_to_bytes(len))
}

fn put_lp1(buf: &mut BytesMut, data: &[u8]) -> Result<(), CodecError> {
    if data.len() > u8::MAX as usize {
        return Err(CodecError::FieldTooLong {
            field: "header byte-string",
            len: data.len(),
        });
    }
    buf.put_u8(data.len() as u8);
    buf.put_slice(data);
    Ok(())
}

fn put_lp2(buf: &mut BytesMut, data: &[u8]) -> Result<(), CodecError> {
    if data.len() > u16::MAX as usize {
        return Err(CodecError::FieldTooLong {
            field: "arg",
            len: data.len(),
        });
    }
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
    Ok(())
}

/// Init request/response body: `version:u16be` plus the required
/// `host_port`/`process_name` header pair. Rejects unknown keys and
/// duplicates on decode; always writes exactly the two required keys,
/// in a fixed order, on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitBody {
    pub version: u16,
    pub host_port: String,
    pub process_name: String,
}

impl InitBody {
    pub fn new(host_port: impl Into<String>, process_name: impl Into<String>) -> Self {
        Self {
            version: INIT_VERSION,
            host_port: host_port.into(),
            process_name: process_name.into(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.version);
        buf.put_u16(2); // nh: exactly the two required keys
        put_lp2(buf, b"host_port")?;
        put_lp2(buf, self.host_port.as_bytes())?;
        put_lp2(buf, b"process_name")?;
        put_lp2(buf, self.process_name.as_bytes())?;
        Ok(())
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, CodecError> {
        if buf.remaining() < 2 {
            return Err(CodecError::Truncated);
        }
        let version = buf.get_u16();
        if buf.remaining() < 2 {
            return Err(CodecError::Truncated);
        }
        let nh = buf.get_u16();
        let mut host_port = None;
        let mut process_name = None;
        for _ in 0..nh {
            let key = get_lp2(buf)?;
            let value = get_lp2(buf)?;
            match key.as_ref() {
                b"host_port" => {
                    if host_port.is_some() {
                        return Err(CodecError::DuplicateInitHeader("host_port"));
                    }
                    host_port = Some(String::from_utf8_lossy(&value).into_owned());
                }
                b"process_name" => {
                    if process_name.is_some() {
                        return Err(CodecError::DuplicateInitHeader("process_name"));
                    }
                    process_name = Some(String::from_utf8_lossy(&value).into_owned());
                }
                other => {
                    return Err(CodecError::InvalidInitHeader(
                        String::from_utf8_lossy(other).into_owned(),
                    ));
                }
            }
        }
        Ok(Self {
            version,
            host_port: host_port.ok_or(CodecError::MissingInitHeader("host_port"))?,
            process_name: process_name.ok_or(CodecError::MissingInitHeader("process_name"))?,
        })
    }
}

fn decode_headers(buf: &mut impl Buf) -> Result<Vec<(Bytes, Bytes)>, CodecError> {
    if !buf.has_remaining() {
        return Err(CodecError::Truncated);
    }
    let nh = buf.get_u8();
    let mut headers = Vec::with_capacity(nh as usize);
    for _ in 0..nh {
        let key = get_lp1(buf)?;
        let value = get_lp1(buf)?;
        headers.push((key, value));
    }
    Ok(headers)
}

fn encode_headers(buf: &mut BytesMut, headers: &[(Bytes, Bytes)]) -> Result<(), CodecError> {
    if headers.len() > u8::MAX as usize {
        return Err(CodecError::FieldTooLong {
            field: "headers",
            len: headers.len(),
        });
    }
    buf.put_u8(headers.len() as u8);
    for (key, value) in headers {
        put_lp1(buf, key)?;
        put_lp1(buf, value)?;
    }
    Ok(())
}

/// `ttl:u32be · tracing:24 · service~2 · nh:u8 · (hk~1 hv~1){nh} · arg1~2 ·
/// arg2~2 · arg3~2 · csumtype:u8 · (csum:u32be){0,1}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequestBody {
    pub ttl_ms: u32,
    pub tracing: [u8; TRACING_LEN],
    pub service: Bytes,
    pub headers: Vec<(Bytes, Bytes)>,
    pub arg1: Bytes,
    pub arg2: Bytes,
    pub arg3: Bytes,
    pub checksum: Checksum,
}

impl CallRequestBody {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u32(self.ttl_ms);
        buf.put_slice(&self.tracing);
        put_lp2(buf, &self.service)?;
        encode_headers(buf, &self.headers)?;
        put_lp2(buf, &self.arg1)?;
        put_lp2(buf, &self.arg2)?;
        put_lp2(buf, &self.arg3)?;
        self.checksum.write(buf);
        Ok(())
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, CodecError> {
        if buf.remaining() < 4 + TRACING_LEN {
            return Err(CodecError::Truncated);
        }
        let ttl_ms = buf.get_u32();
        let mut tracing = [0u8; TRACING_LEN];
        buf.copy_to_slice(&mut tracing);
        let service = get_lp2(buf)?;
        let headers = decode_headers(buf)?;
        let arg1 = get_lp2(buf)?;
        let arg2 = get_lp2(buf)?;
        let arg3 = get_lp2(buf)?;
        let checksum = Checksum::decode(buf).map_err(CodecError::Checksum)?;
        Ok(Self {
            ttl_ms,
            tracing,
            service,
            headers,
            arg1,
            arg2,
            arg3,
            checksum,
        })
    }
}

/// `code:u8`, then the same header/arg/checksum grammar as [`CallRequestBody`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResponseBody {
    pub code: u8,
    pub headers: Vec<(Bytes, Bytes)>,
    pub arg1: Bytes,
    pub arg2: Bytes,
    pub arg3: Bytes,
    pub checksum: Checksum,
}

impl CallResponseBody {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u8(self.code);
        encode_headers(buf, &self.headers)?;
        put_lp2(buf, &self.arg1)?;
        put_lp2(buf, &self.arg2)?;
        put_lp2(buf, &self.arg3)?;
        self.checksum.write(buf);
        Ok(())
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, CodecError> {
        if !buf.has_remaining() {
            return Err(CodecError::Truncated);
        }
        let code = buf.get_u8();
        let headers = decode_headers(buf)?;
        let arg1 = get_lp2(buf)?;
        let arg2 = get_lp2(buf)?;
        let arg3 = get_lp2(buf)?;
        let checksum = Checksum::decode(buf).map_err(CodecError::Checksum)?;
        Ok(Self {
            code,
            headers,
            arg1,
            arg2,
            arg3,
            checksum,
        })
    }
}

/// `code:u8`, `message: UTF-8 bytes ~2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: u8,
    pub message: String,
}

impl ErrorBody {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u8(self.code);
        put_lp2(buf, self.message.as_bytes())?;
        Ok(())
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, CodecError> {
        if !buf.has_remaining() {
            return Err(CodecError::Truncated);
        }
        let code = buf.get_u8();
        let message_bytes = get_lp2(buf)?;
        let message = String::from_utf8(message_bytes.to_vec())
            .map_err(|_| CodecError::InvalidUtf8("error message"))?;
        Ok(Self { code, message })
    }
}
