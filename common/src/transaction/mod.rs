// Legacy-format transactions as relayed over the JSON-RPC boundary.

use crate::{
    config::TX_VERSION,
    crypto::{Hash, Hashable},
    script::{decode_script_number, Instruction, Script, OP_0, OP_1, OP_16},
    serializer::*,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

mod verify;

pub use verify::{sign_p2pkh_input, verify_input, SIGHASH_FORKID_TYPE};


/// Sequence value that disables relative lock time and replacement
pub const FINAL_SEQUENCE: u32 = 0xffff_ffff;

/// Reference to one output of a previous transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash,
    #[serde(rename = "n")]
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The outpoint a coinbase input refers to
    pub fn null() -> Self {
        Self {
            txid: Hash::zero(),
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

impl Display for OutPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl Serializer for OutPoint {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.txid);
        writer.write_u32(self.vout);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            txid: reader.read_hash()?,
            vout: reader.read_u32()?,
        })
    }

    fn size(&self) -> usize {
        36
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
}

impl TxIn {
    /// Input with an empty unlocking script, to be signed later
    pub fn unsigned(previous_output: OutPoint) -> Self {
        Self {
            previous_output,
            script_sig: Script::new(),
            sequence: FINAL_SEQUENCE,
        }
    }
}

impl Serializer for TxIn {
    fn write(&self, writer: &mut Writer) {
        self.previous_output.write(writer);
        self.script_sig.write(writer);
        writer.write_u32(self.sequence);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            previous_output: OutPoint::read(reader)?,
            script_sig: Script::read(reader)?,
            sequence: reader.read_u32()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: u64, script_pubkey: Script) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }
}

impl Serializer for TxOut {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.value);
        self.script_pubkey.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            value: reader.read_u64()?,
            script_pubkey: Script::read(reader)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Self {
        Self {
            version: TX_VERSION,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Coinbase for a block at `height`.
    ///
    /// The unlocking script starts with the height (BIP34) followed by `tag`,
    /// which keeps coinbases of different producers at the same height apart.
    pub fn coinbase(height: u64, tag: &[u8], outputs: Vec<TxOut>) -> Self {
        let script_sig = Script::new().push_int(height as i64).push_data(tag);
        let input = TxIn {
            previous_output: OutPoint::null(),
            script_sig,
            sequence: FINAL_SEQUENCE,
        };
        Self::new(vec![input], outputs)
    }

    pub fn txid(&self) -> Hash {
        self.hash()
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Height committed to by a coinbase, `None` for other transactions
    pub fn coinbase_height(&self) -> Option<u64> {
        if !self.is_coinbase() {
            return None;
        }
        let script = &self.inputs[0].script_sig;
        let first = script.instructions().ok()?.into_iter().next()?;
        match first {
            Instruction::Op(OP_0) => Some(0),
            Instruction::Op(op) if (OP_1..=OP_16).contains(&op) => Some((op - OP_1 + 1) as u64),
            Instruction::Push(data) => decode_script_number(data)
                .ok()
                .and_then(|h| u64::try_from(h).ok()),
            Instruction::Op(_) => None,
        }
    }

    pub fn output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Outpoint of output `vout` of this transaction
    pub fn outpoint(&self, vout: u32) -> OutPoint {
        OutPoint::new(self.txid(), vout)
    }
}

impl Serializer for Transaction {
    fn write(&self, writer: &mut Writer) {
        writer.write_i32(self.version);
        self.inputs.write(writer);
        self.outputs.write(writer);
        writer.write_u32(self.lock_time);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let version = reader.read_i32()?;
        let inputs = Vec::<TxIn>::read(reader)?;
        let outputs = Vec::<TxOut>::read(reader)?;
        let lock_time = reader.read_u32()?;
        if inputs.is_empty() {
            return Err(ReaderError::InvalidValue("transaction without inputs"));
        }
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

impl Hashable for Transaction {}
