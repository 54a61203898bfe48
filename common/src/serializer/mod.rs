// Wire encoding for transactions and blocks.
//
// Integers are little-endian, lengths are compact-size varints, exactly like
// the legacy bitcoin network format so hex blobs can cross the JSON-RPC
// boundary unchanged.

mod reader;
mod writer;

pub use reader::{Reader, ReaderError};
pub use writer::Writer;

/// Types that can be written to and read back from the wire format
pub trait Serializer: Sized {
    fn write(&self, writer: &mut Writer);

    fn read(reader: &mut Reader) -> Result<Self, ReaderError>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.bytes()
    }

    /// Decode a complete value, rejecting trailing bytes
    fn from_bytes(bytes: &[u8]) -> Result<Self, ReaderError> {
        let mut reader = Reader::new(bytes);
        let value = Self::read(&mut reader)?;
        if reader.remaining() != 0 {
            return Err(ReaderError::TrailingBytes(reader.remaining()));
        }
        Ok(value)
    }

    fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    fn from_hex(hex: &str) -> Result<Self, ReaderError> {
        let bytes = hex::decode(hex).map_err(|_| ReaderError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }

    fn size(&self) -> usize {
        self.to_bytes().len()
    }
}

impl<T: Serializer> Serializer for Vec<T> {
    fn write(&self, writer: &mut Writer) {
        writer.write_compact_size(self.len() as u64);
        for item in self {
            item.write(writer);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let count = reader.read_compact_size()?;
        // Every element takes at least one byte
        if count > reader.remaining() as u64 {
            return Err(ReaderError::InvalidSize);
        }
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(T::read(reader)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_compact_size_boundaries() {
        let cases: [(u64, usize); 6] = [
            (0, 1),
            (0xfc, 1),
            (0xfd, 3),
            (0xffff, 3),
            (0x1_0000, 5),
            (0x1_0000_0000, 9),
        ];
        for (value, len) in cases {
            let mut writer = Writer::new();
            writer.write_compact_size(value);
            let bytes = writer.bytes();
            assert_eq!(bytes.len(), len, "encoded length of {value:#x}");

            let mut reader = Reader::new(&bytes);
            assert_eq!(reader.read_compact_size().unwrap(), value);
        }
    }

    #[test]
    fn test_non_canonical_compact_size_rejected() {
        // 0x10 encoded with the 3-byte form
        let mut reader = Reader::new(&[0xfd, 0x10, 0x00]);
        assert!(matches!(
            reader.read_compact_size(),
            Err(ReaderError::NonCanonicalVarInt)
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        #[derive(Debug)]
        struct Byte(u8);
        impl Serializer for Byte {
            fn write(&self, writer: &mut Writer) {
                writer.write_u8(self.0);
            }
            fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
                Ok(Byte(reader.read_u8()?))
            }
        }

        assert!(Byte::from_bytes(&[7]).is_ok());
        assert!(matches!(
            Byte::from_bytes(&[7, 8]),
            Err(ReaderError::TrailingBytes(1))
        ));
    }

    proptest! {
        #[test]
        fn prop_var_bytes_survive_reader(data in proptest::collection::vec(any::<u8>(), 0..600)) {
            let mut writer = Writer::new();
            writer.write_var_bytes(&data);
            let bytes = writer.bytes();
            let mut reader = Reader::new(&bytes);
            prop_assert_eq!(reader.read_var_bytes().unwrap(), data);
            prop_assert_eq!(reader.remaining(), 0);
        }
    }
}
