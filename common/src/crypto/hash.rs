use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use ripemd::Ripemd160;
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    convert::TryInto,
    fmt::{Debug, Display, Error, Formatter},
    str::FromStr,
};

pub const HASH_SIZE: usize = 32; // 32 bytes / 256 bits

/// 256-bit digest stored in internal (little-endian) byte order.
///
/// Text forms (`Display`, `FromStr`, serde) use the reversed hex order that
/// node RPC interfaces print for block and transaction ids.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    pub const fn zero() -> Self {
        Hash::new([0; HASH_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; HASH_SIZE]
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; HASH_SIZE] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }
}

impl FromStr for Hash {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| "Invalid hex string")?;
        let mut bytes: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| "Invalid hash")?;
        bytes.reverse();
        Ok(Hash::new(bytes))
    }
}

/// Single SHA-256
pub fn sha256(value: &[u8]) -> [u8; HASH_SIZE] {
    Sha256::digest(value).into()
}

/// Double SHA-256, the identity hash of transactions and block headers
pub fn hash256(value: &[u8]) -> Hash {
    Hash(sha256(&sha256(value)))
}

/// RIPEMD-160 of SHA-256, used for public key hashes
pub fn hash160(value: &[u8]) -> [u8; 20] {
    Ripemd160::digest(sha256(value)).into()
}

/// Values identified by the double SHA-256 of their wire encoding
pub trait Hashable: Serializer {
    #[inline(always)]
    fn hash(&self) -> Hash {
        hash256(&self.to_bytes())
    }
}

impl Serializer for Hash {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_hash()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_hash(self);
    }

    fn size(&self) -> usize {
        HASH_SIZE
    }
}

impl AsRef<Hash> for Hash {
    fn as_ref(&self) -> &Hash {
        self
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", &self.to_hex())
    }
}

impl Debug for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "Hash({})", &self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'a> Deserialize<'a> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        if hex.len() != HASH_SIZE * 2 {
            return Err(SerdeError::custom("Invalid hex length"));
        }
        Hash::from_str(&hex).map_err(SerdeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_reversed_byte_order() {
        let mut bytes = [0u8; HASH_SIZE];
        bytes[0] = 0xab;
        let hash = Hash::new(bytes);
        let text = hash.to_string();
        assert!(text.ends_with("ab"));
        assert_eq!(Hash::from_str(&text).unwrap(), hash);
    }

    #[test]
    fn test_hash256_known_vector() {
        // Double SHA-256 of the empty string
        assert_eq!(
            hex::encode(hash256(b"").as_bytes()),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn test_hash160_known_vector() {
        assert_eq!(
            hex::encode(hash160(b"")),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }

    #[test]
    fn test_serde_uses_display_form() {
        let hash = hash256(b"minerid");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
