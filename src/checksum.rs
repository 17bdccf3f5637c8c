// ABOUTME: Pluggable payload-integrity checksums keyed by wire type id
// ABOUTME: None/Crc32/FarmHash32 are registered by default; callers may add more

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

pub const CHECKSUM_NONE: u8 = 0;
pub const CHECKSUM_CRC32: u8 = 1;
pub const CHECKSUM_FARMHASH32: u8 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("unknown checksum type id {0}")]
    UnknownType(u8),
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    Mismatch { expected: u32, actual: u32 },
    #[error("truncated checksum field")]
    Truncated,
}

/// A single checksum algorithm, keyed into the registry by its wire type id.
///
/// The codec never hard-wires crc32 or farmhash32 directly; it only ever
/// asks a [`ChecksumRegistry`] to compute or verify by id.
pub trait ChecksumAlgorithm: Send + Sync {
    fn compute(&self, arg1: &[u8], arg2: &[u8], arg3: &[u8]) -> u32;
}

struct Crc32Algorithm;

impl ChecksumAlgorithm for Crc32Algorithm {
    fn compute(&self, arg1: &[u8], arg2: &[u8], arg3: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(arg1);
        hasher.update(arg2);
        hasher.update(arg3);
        hasher.finalize()
    }
}

/// Self-contained 32-bit mix in the spirit of FarmHash's short-string path.
/// Not claimed to be byte-compatible with any external farmhash library —
/// there is no interop partner in this crate's scope, only the requirement
/// that the same implementation agree with itself across encode/decode.
struct FarmHash32Algorithm;

impl FarmHash32Algorithm {
    fn mix(mut h: u32) -> u32 {
        h ^= h >> 16;
        h = h.wrapping_mul(0x85ebca6b);
        h ^= h >> 13;
        h = h.wrapping_mul(0xc2b2ae35);
        h ^= h >> 16;
        h
    }
}

impl ChecksumAlgorithm for FarmHash32Algorithm {
    fn compute(&self, arg1: &[u8], arg2: &[u8], arg3: &[u8]) -> u32 {
        const SEED: u32 = 0x9e3779b9;
        let mut h = SEED;
        for chunk in [arg1, arg2, arg3] {
            for &byte in chunk {
                h = h.wrapping_add(byte as u32);
                h = Self::mix(h);
            }
            // fold in the length so "a","" and "","a" don't collide
            h = h.wrapping_add(chunk.len() as u32);
        }
        Self::mix(h)
    }
}

struct NoneAlgorithm;

impl ChecksumAlgorithm for NoneAlgorithm {
    fn compute(&self, _arg1: &[u8], _arg2: &[u8], _arg3: &[u8]) -> u32 {
        0
    }
}

/// Registry of checksum algorithms by wire type id, mirroring the codec's
/// frame-decoder registry so new algorithms can be added without touching
/// the body codec.
pub struct ChecksumRegistry {
    algorithms: HashMap<u8, Box<dyn ChecksumAlgorithm>>,
}

impl Default for ChecksumRegistry {
    fn default() -> Self {
        let mut registry = Self {
            algorithms: HashMap::new(),
        };
        registry
            .algorithms
            .insert(CHECKSUM_NONE, Box::new(NoneAlgorithm));
        registry
            .algorithms
            .insert(CHECKSUM_CRC32, Box::new(Crc32Algorithm));
        registry
            .algorithms
            .insert(CHECKSUM_FARMHASH32, Box::new(FarmHash32Algorithm));
        registry
    }
}

impl ChecksumRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an algorithm under a custom type id, overwriting any prior
    /// registration for that id.
    pub fn register(&mut self, type_id: u8, algorithm: Box<dyn ChecksumAlgorithm>) {
        self.algorithms.insert(type_id, algorithm);
    }

    pub fn is_registered(&self, type_id: u8) -> bool {
        self.algorithms.contains_key(&type_id)
    }

    fn compute(&self, type_id: u8, arg1: &[u8], arg2: &[u8], arg3: &[u8]) -> Result<u32, ChecksumError> {
        self.algorithms
            .get(&type_id)
            .map(|algo| algo.compute(arg1, arg2, arg3))
            .ok_or(ChecksumError::UnknownType(type_id))
    }
}

/// An on-wire checksum value: a type id plus (for non-`none` types) the
/// computed 32-bit sum. `write`/`decode` are the wire codec; `update`
/// computes a fresh value against a registry; `verify` recomputes and
/// compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum {
    pub type_id: u8,
    pub value: u32,
}

impl Checksum {
    pub fn none() -> Self {
        Self {
            type_id: CHECKSUM_NONE,
            value: 0,
        }
    }

    /// Compute a fresh checksum of the given type over the concatenated
    /// args, via the registry.
    pub fn update(
        registry: &ChecksumRegistry,
        type_id: u8,
        arg1: &[u8],
        arg2: &[u8],
        arg3: &[u8],
    ) -> Result<Self, ChecksumError> {
        if type_id == CHECKSUM_NONE {
            return Ok(Self::none());
        }
        let value = registry.compute(type_id, arg1, arg2, arg3)?;
        Ok(Self { type_id, value })
    }

    /// Emit `csumtype:1` then `csum:4` iff type != none.
    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.type_id);
        if self.type_id != CHECKSUM_NONE {
            buf.put_u32(self.value);
        }
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, ChecksumError> {
        if !buf.has_remaining() {
            return Err(ChecksumError::Truncated);
        }
        let type_id = buf.get_u8();
        if type_id == CHECKSUM_NONE {
            return Ok(Self::none());
        }
        if buf.remaining() < 4 {
            return Err(ChecksumError::Truncated);
        }
        Ok(Self {
            type_id,
            value: buf.get_u32(),
        })
    }

    /// Recompute over the given args and compare against the stored value.
    /// A `none`-typed checksum always verifies.
    pub fn verify(
        &self,
        registry: &ChecksumRegistry,
        arg1: &[u8],
        arg2: &[u8],
        arg3: &[u8],
    ) -> Result<(), ChecksumError> {
        if self.type_id == CHECKSUM_NONE {
            return Ok(());
        }
        let expected = registry.compute(self.type_id, arg1, arg2, arg3)?;
        if expected != self.value {
            return Err(ChecksumError::Mismatch {
                expected,
                actual: self.value,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_round_trips_with_no_value_bytes() {
        let registry = ChecksumRegistry::new();
        let sum = Checksum::update(&registry, CHECKSUM_NONE, b"a", b"b", b"c").unwrap();
        let mut buf = BytesMut::new();
        sum.write(&mut buf);
        assert_eq!(&buf[..], &[0u8]);
        let decoded = Checksum::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, sum);
    }

    #[test]
    fn crc32_round_trips_and_verifies() {
        let registry = ChecksumRegistry::new();
        let sum = Checksum::update(&registry, CHECKSUM_CRC32, b"arg1", b"arg2", b"arg3").unwrap();
        assert_ne!(sum.value, 0);
        let mut buf = BytesMut::new();
        sum.write(&mut buf);
        assert_eq!(buf.len(), 5);
        let decoded = Checksum::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, sum);
        decoded.verify(&registry, b"arg1", b"arg2", b"arg3").unwrap();
    }

    #[test]
    fn crc32_mismatch_is_rejected() {
        let registry = ChecksumRegistry::new();
        let sum = Checksum::update(&registry, CHECKSUM_CRC32, b"arg1", b"arg2", b"arg3").unwrap();
        let err = sum.verify(&registry, b"tampered", b"arg2", b"arg3").unwrap_err();
        assert!(matches!(err, ChecksumError::Mismatch { .. }));
    }

    #[test]
    fn farmhash32_round_trips_and_verifies() {
        let registry = ChecksumRegistry::new();
        let sum = Checksum::update(&registry, CHECKSUM_FARMHASH32, b"h", b"", b"hello").unwrap();
        let mut buf = BytesMut::new();
        sum.write(&mut buf);
        let decoded = Checksum::decode(&mut buf.freeze()).unwrap();
        decoded.verify(&registry, b"h", b"", b"hello").unwrap();
    }

    #[test]
    fn unknown_type_id_is_rejected() {
        let registry = ChecksumRegistry::new();
        let err = Checksum::update(&registry, 0x42, b"a", b"b", b"c").unwrap_err();
        assert_eq!(err, ChecksumError::UnknownType(0x42));
    }

    #[test]
    fn decode_truncated_is_rejected() {
        let mut empty = &b""[..];
        assert_eq!(Checksum::decode(&mut empty).unwrap_err(), ChecksumError::Truncated);
        let mut short = &[CHECKSUM_CRC32, 0x01, 0x02][..];
        assert_eq!(Checksum::decode(&mut short).unwrap_err(), ChecksumError::Truncated);
    }

    #[test]
    fn custom_algorithm_can_be_registered() {
        struct AlwaysOne;
        impl ChecksumAlgorithm for AlwaysOne {
            fn compute(&self, _: &[u8], _: &[u8], _: &[u8]) -> u32 {
                1
            }
        }
        let mut registry = ChecksumRegistry::new();
        assert!(!registry.is_registered(0x7f));
        registry.register(0x7f, Box::new(AlwaysOne));
        assert!(registry.is_registered(0x7f));
        let sum = Checksum::update(&registry, 0x7f, b"", b"", b"").unwrap();
        assert_eq!(sum.value, 1);
    }
}
