// 80-byte block header and its proof-of-work target.

use crate::crypto::{Hash, Hashable, HASH_SIZE};
use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

pub const HEADER_SIZE: usize = 80;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

/// Expand a compact `bits` value into the full 256-bit target.
///
/// Returns `None` for negative or overflowing encodings.
pub fn compact_to_target(bits: u32) -> Option<U256> {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;
    if bits & 0x0080_0000 != 0 && mantissa != 0 {
        return None;
    }
    if exponent <= 3 {
        return Some(U256::from(mantissa >> (8 * (3 - exponent))));
    }
    let shift = 8 * (exponent - 3);
    if shift > 255 - 23 && mantissa != 0 {
        return None;
    }
    Some(U256::from(mantissa) << shift)
}

impl BlockHeader {
    pub fn hash_value(&self) -> U256 {
        U256::from_little_endian(self.hash().as_bytes())
    }

    pub fn target(&self) -> Option<U256> {
        compact_to_target(self.bits)
    }

    pub fn meets_target(&self) -> bool {
        self.target()
            .map(|target| self.hash_value() <= target)
            .unwrap_or(false)
    }
}

impl Serializer for BlockHeader {
    fn write(&self, writer: &mut Writer) {
        writer.write_i32(self.version);
        writer.write_hash(&self.prev_block);
        writer.write_hash(&self.merkle_root);
        writer.write_u32(self.time);
        writer.write_u32(self.bits);
        writer.write_u32(self.nonce);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            version: reader.read_i32()?,
            prev_block: reader.read_hash()?,
            merkle_root: reader.read_hash()?,
            time: reader.read_u32()?,
            bits: reader.read_u32()?,
            nonce: reader.read_u32()?,
        })
    }

    fn size(&self) -> usize {
        4 + HASH_SIZE * 2 + 12
    }
}

impl Hashable for BlockHeader {}
