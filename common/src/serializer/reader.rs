use crate::crypto::{Hash, HASH_SIZE};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    #[error("Unexpected end of data: needed {needed} bytes, {available} available")]
    UnexpectedEnd { needed: usize, available: usize },

    #[error("Compact size is not minimally encoded")]
    NonCanonicalVarInt,

    #[error("Declared size exceeds remaining data")]
    InvalidSize,

    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("Invalid hex string")]
    InvalidHex,

    #[error("{0} trailing bytes after decoded value")]
    TrailingBytes(usize),
}

/// Cursor over a borrowed byte slice
pub struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    pub fn total_read(&self) -> usize {
        self.position
    }

    pub fn read_bytes_ref(&mut self, n: usize) -> Result<&'a [u8], ReaderError> {
        if n > self.remaining() {
            return Err(ReaderError::UnexpectedEnd {
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.bytes[self.position..self.position + n];
        self.position += n;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ReaderError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes_ref(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ReaderError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ReaderError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ReaderError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ReaderError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ReaderError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_hash(&mut self) -> Result<Hash, ReaderError> {
        Ok(Hash::new(self.read_array::<HASH_SIZE>()?))
    }

    pub fn read_compact_size(&mut self) -> Result<u64, ReaderError> {
        let value = match self.read_u8()? {
            0xfd => {
                let v = self.read_u16()? as u64;
                if v < 0xfd {
                    return Err(ReaderError::NonCanonicalVarInt);
                }
                v
            }
            0xfe => {
                let v = self.read_u32()? as u64;
                if v <= 0xffff {
                    return Err(ReaderError::NonCanonicalVarInt);
                }
                v
            }
            0xff => {
                let v = self.read_u64()?;
                if v <= 0xffff_ffff {
                    return Err(ReaderError::NonCanonicalVarInt);
                }
                v
            }
            small => small as u64,
        };
        Ok(value)
    }

    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, ReaderError> {
        let len = self.read_compact_size()?;
        if len > self.remaining() as u64 {
            return Err(ReaderError::InvalidSize);
        }
        Ok(self.read_bytes_ref(len as usize)?.to_vec())
    }
}
