// Locking and unlocking scripts.
//
// Only the handful of templates the harness and the simulated nodes need are
// understood: pay-to-pubkey-hash, the anyone-can-spend OP_TRUE output used
// for funding sources, and OP_FALSE OP_RETURN data carriers.

use crate::crypto::CryptoError;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use std::fmt::{Debug, Formatter};
use thiserror::Error;

pub const OP_0: u8 = 0x00;
pub const OP_FALSE: u8 = OP_0;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_TRUE: u8 = OP_1;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Push operation runs past the end of the script")]
    TruncatedPush,

    #[error("Script contains non-push opcode {0:#04x}")]
    NonPushOpcode(u8),

    #[error("Output is provably unspendable")]
    Unspendable,

    #[error("Output script is not a recognised template")]
    NonStandard,

    #[error("Unlocking script does not match the locking template")]
    MalformedUnlock,

    #[error("Public key does not hash to the locked key hash")]
    PubKeyHashMismatch,

    #[error("Unsupported sighash type {0:#04x}")]
    BadSighashType(u8),

    #[error("Input index {0} out of range")]
    InputIndex(usize),

    #[error("Script number does not fit in 8 bytes")]
    NumberOverflow,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// A single parsed script element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    Op(u8),
    Push(&'a [u8]),
}

/// Standard output shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptKind {
    P2pkh([u8; 20]),
    AnyoneCanSpend,
    NullData,
    NonStandard,
}

#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Script(Vec<u8>);

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push_opcode(mut self, opcode: u8) -> Self {
        self.0.push(opcode);
        self
    }

    /// Push `data` with the smallest push operation that fits it
    pub fn push_data(mut self, data: &[u8]) -> Self {
        let len = data.len();
        if len < OP_PUSHDATA1 as usize {
            self.0.push(len as u8);
        } else if len <= 0xff {
            self.0.push(OP_PUSHDATA1);
            self.0.push(len as u8);
        } else if len <= 0xffff {
            self.0.push(OP_PUSHDATA2);
            self.0.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            self.0.push(OP_PUSHDATA4);
            self.0.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.0.extend_from_slice(data);
        self
    }

    /// Push an integer, using the small-number opcodes where possible
    pub fn push_int(self, value: i64) -> Self {
        match value {
            0 => self.push_opcode(OP_0),
            -1 => self.push_opcode(OP_1NEGATE),
            1..=16 => self.push_opcode(OP_1 + (value as u8) - 1),
            _ => {
                let encoded = encode_script_number(value);
                self.push_data(&encoded)
            }
        }
    }

    pub fn p2pkh(pubkey_hash: &[u8; 20]) -> Self {
        Script::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_data(pubkey_hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
    }

    pub fn anyone_can_spend() -> Self {
        Script::new().push_opcode(OP_TRUE)
    }

    /// `OP_FALSE OP_RETURN` followed by one push per element of `pushes`
    pub fn null_data<T: AsRef<[u8]>>(pushes: &[T]) -> Self {
        pushes.iter().fold(
            Script::new().push_opcode(OP_FALSE).push_opcode(OP_RETURN),
            |script, data| script.push_data(data.as_ref()),
        )
    }

    pub fn instructions(&self) -> Result<Vec<Instruction<'_>>, ScriptError> {
        parse_instructions(&self.0)
    }

    /// Data of every element, failing on anything that is not a push
    pub fn pushes(&self) -> Result<Vec<&[u8]>, ScriptError> {
        collect_pushes(parse_instructions(&self.0)?)
    }

    /// Pushes following `OP_FALSE OP_RETURN`, or `None` for any other script
    pub fn null_data_pushes(&self) -> Option<Vec<&[u8]>> {
        if self.classify() != ScriptKind::NullData {
            return None;
        }
        parse_instructions(&self.0[2..])
            .and_then(collect_pushes)
            .ok()
    }

    pub fn classify(&self) -> ScriptKind {
        let b = &self.0;
        if b.len() == 25
            && b[0] == OP_DUP
            && b[1] == OP_HASH160
            && b[2] == 20
            && b[23] == OP_EQUALVERIFY
            && b[24] == OP_CHECKSIG
        {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&b[3..23]);
            return ScriptKind::P2pkh(hash);
        }
        if b.as_slice() == [OP_TRUE] {
            return ScriptKind::AnyoneCanSpend;
        }
        if b.len() >= 2 && b[0] == OP_FALSE && b[1] == OP_RETURN {
            return ScriptKind::NullData;
        }
        ScriptKind::NonStandard
    }
}

fn parse_instructions(bytes: &[u8]) -> Result<Vec<Instruction<'_>>, ScriptError> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let opcode = bytes[i];
        i += 1;
        let len = match opcode {
            0x01..=0x4b => opcode as usize,
            OP_PUSHDATA1 => {
                let len = *bytes.get(i).ok_or(ScriptError::TruncatedPush)? as usize;
                i += 1;
                len
            }
            OP_PUSHDATA2 => {
                let raw = bytes.get(i..i + 2).ok_or(ScriptError::TruncatedPush)?;
                i += 2;
                u16::from_le_bytes([raw[0], raw[1]]) as usize
            }
            OP_PUSHDATA4 => {
                let raw = bytes.get(i..i + 4).ok_or(ScriptError::TruncatedPush)?;
                i += 4;
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
            }
            _ => {
                out.push(Instruction::Op(opcode));
                continue;
            }
        };
        let data = bytes.get(i..i + len).ok_or(ScriptError::TruncatedPush)?;
        i += len;
        out.push(Instruction::Push(data));
    }
    Ok(out)
}

fn collect_pushes(instructions: Vec<Instruction<'_>>) -> Result<Vec<&[u8]>, ScriptError> {
    instructions
        .into_iter()
        .map(|ins| match ins {
            Instruction::Push(data) => Ok(data),
            Instruction::Op(OP_0) => Ok(&[][..]),
            Instruction::Op(op) => Err(ScriptError::NonPushOpcode(op)),
        })
        .collect()
}

/// Minimal little-endian sign-magnitude encoding
pub fn encode_script_number(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut abs = value.unsigned_abs();
    let mut out = Vec::new();
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if out[out.len() - 1] & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        let last = out.len() - 1;
        out[last] |= 0x80;
    }
    out
}

pub fn decode_script_number(bytes: &[u8]) -> Result<i64, ScriptError> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 8 {
        return Err(ScriptError::NumberOverflow);
    }
    let mut magnitude: u64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        magnitude |= (*byte as u64) << (8 * i);
    }
    let sign_bit = 0x80u64 << (8 * (bytes.len() - 1));
    if magnitude & sign_bit != 0 {
        Ok(-((magnitude & !sign_bit) as i64))
    } else {
        Ok(magnitude as i64)
    }
}

impl Serializer for Script {
    fn write(&self, writer: &mut Writer) {
        writer.write_var_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Script(reader.read_var_bytes()?))
    }

    fn size(&self) -> usize {
        let len = self.0.len();
        let prefix = match len {
            0..=0xfc => 1,
            0xfd..=0xffff => 3,
            _ => 5,
        };
        prefix + len
    }
}

impl Debug for Script {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Script({})", hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p2pkh_classifies() {
        let hash = [7u8; 20];
        let script = Script::p2pkh(&hash);
        assert_eq!(script.len(), 25);
        assert_eq!(script.classify(), ScriptKind::P2pkh(hash));
        assert_eq!(Script::anyone_can_spend().classify(), ScriptKind::AnyoneCanSpend);
        assert_eq!(
            Script::from_bytes(vec![OP_DUP]).classify(),
            ScriptKind::NonStandard
        );
    }

    #[test]
    fn test_push_data_uses_minimal_opcode() {
        assert_eq!(Script::new().push_data(&[1; 75]).as_bytes()[0], 75);
        assert_eq!(Script::new().push_data(&[1; 76]).as_bytes()[0], OP_PUSHDATA1);
        assert_eq!(Script::new().push_data(&[1; 256]).as_bytes()[0], OP_PUSHDATA2);
    }

    #[test]
    fn test_null_data_pushes() {
        let doc = vec![b'x'; 300];
        let script = Script::null_data(&[&[0x60, 0x1d, 0xfa, 0xce][..], &[0x00][..], &doc[..]]);
        assert_eq!(script.classify(), ScriptKind::NullData);
        let pushes = script.null_data_pushes().unwrap();
        assert_eq!(pushes.len(), 3);
        assert_eq!(pushes[0], &[0x60, 0x1d, 0xfa, 0xce]);
        assert_eq!(pushes[1], &[0x00]);
        assert_eq!(pushes[2], doc.as_slice());
        assert!(Script::p2pkh(&[0; 20]).null_data_pushes().is_none());
    }

    #[test]
    fn test_truncated_push_rejected() {
        let script = Script::from_bytes(vec![0x05, 0x01, 0x02]);
        assert_eq!(script.instructions(), Err(ScriptError::TruncatedPush));
    }

    #[test]
    fn test_script_numbers() {
        for (value, bytes) in [
            (0i64, vec![]),
            (1, vec![0x01]),
            (127, vec![0x7f]),
            (128, vec![0x80, 0x00]),
            (-1, vec![0x81]),
            (255, vec![0xff, 0x00]),
            (500, vec![0xf4, 0x01]),
        ] {
            assert_eq!(encode_script_number(value), bytes, "encode {value}");
            assert_eq!(decode_script_number(&bytes).unwrap(), value, "decode {value}");
        }
    }

    #[test]
    fn test_push_int_small_numbers() {
        assert_eq!(Script::new().push_int(0).as_bytes(), &[OP_0]);
        assert_eq!(Script::new().push_int(16).as_bytes(), &[OP_16]);
        assert_eq!(Script::new().push_int(17).as_bytes(), &[0x01, 0x11]);
    }
}
