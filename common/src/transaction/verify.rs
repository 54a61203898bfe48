// Signature hashing and input verification for the ALL|FORKID sighash.

use super::{Transaction, TxOut};
use crate::{
    config::SIGHASH_ALL_FORKID,
    crypto::{hash256, KeyPair, PublicKey},
    script::{Script, ScriptError, ScriptKind},
    serializer::{Serializer, Writer},
};

pub const SIGHASH_FORKID_TYPE: u32 = SIGHASH_ALL_FORKID as u32;

impl Transaction {
    /// Digest signed by input `index` spending `prev_out`.
    ///
    /// Follows the BIP143-style preimage used with the fork id flag:
    /// the spent value and script are committed to directly.
    pub fn signature_hash(&self, index: usize, prev_out: &TxOut) -> Result<[u8; 32], ScriptError> {
        let input = self.inputs.get(index).ok_or(ScriptError::InputIndex(index))?;

        let mut prevouts = Writer::new();
        let mut sequences = Writer::new();
        for txin in &self.inputs {
            txin.previous_output.write(&mut prevouts);
            sequences.write_u32(txin.sequence);
        }
        let mut outputs = Writer::new();
        for txout in &self.outputs {
            txout.write(&mut outputs);
        }

        let mut preimage = Writer::new();
        preimage.write_i32(self.version);
        preimage.write_hash(&hash256(&prevouts.bytes()));
        preimage.write_hash(&hash256(&sequences.bytes()));
        input.previous_output.write(&mut preimage);
        preimage.write_var_bytes(prev_out.script_pubkey.as_bytes());
        preimage.write_u64(prev_out.value);
        preimage.write_u32(input.sequence);
        preimage.write_hash(&hash256(&outputs.bytes()));
        preimage.write_u32(self.lock_time);
        preimage.write_u32(SIGHASH_FORKID_TYPE);

        Ok(hash256(&preimage.bytes()).to_bytes())
    }
}

/// Fill the unlocking script of input `index` with `<sig> <pubkey>`
pub fn sign_p2pkh_input(
    tx: &mut Transaction,
    index: usize,
    key: &KeyPair,
    prev_out: &TxOut,
) -> Result<(), ScriptError> {
    let digest = tx.signature_hash(index, prev_out)?;
    let mut signature = key.sign_digest(&digest)?;
    signature.push(SIGHASH_ALL_FORKID);

    let script_sig = Script::new()
        .push_data(&signature)
        .push_data(&key.public_key().to_bytes());
    tx.inputs[index].script_sig = script_sig;
    Ok(())
}

/// Check that input `index` may spend `prev_out`
pub fn verify_input(tx: &Transaction, index: usize, prev_out: &TxOut) -> Result<(), ScriptError> {
    let input = tx.inputs.get(index).ok_or(ScriptError::InputIndex(index))?;
    match prev_out.script_pubkey.classify() {
        ScriptKind::AnyoneCanSpend => {
            // Any push-only unlocking script leaves OP_TRUE on top
            input.script_sig.pushes()?;
            Ok(())
        }
        ScriptKind::P2pkh(expected_hash) => {
            let pushes = input.script_sig.pushes()?;
            let [signature, pubkey] = pushes.as_slice() else {
                return Err(ScriptError::MalformedUnlock);
            };
            let (sighash_type, der) = signature
                .split_last()
                .ok_or(ScriptError::MalformedUnlock)?;
            if *sighash_type != SIGHASH_ALL_FORKID {
                return Err(ScriptError::BadSighashType(*sighash_type));
            }
            let pubkey = PublicKey::from_bytes(pubkey)?;
            if pubkey.hash160() != expected_hash {
                return Err(ScriptError::PubKeyHashMismatch);
            }
            let digest = tx.signature_hash(index, prev_out)?;
            pubkey.verify(&digest, der)?;
            Ok(())
        }
        ScriptKind::NullData => Err(ScriptError::Unspendable),
        ScriptKind::NonStandard => Err(ScriptError::NonStandard),
    }
}
