// Miner identity attestation payloads.
//
// A miner-info transaction carries a signed JSON document declaring the
// miner's identity keys for a given block height. Blocks produced by the
// same miner link to that transaction through an extra coinbase output.

use crate::{
    block::Block,
    config::{
        MINER_ID_PROTOCOL_ID, MINER_INFO_DOCUMENT_VERSION, MINER_INFO_PROTOCOL_ID,
        MINER_INFO_PROTOCOL_VERSION,
    },
    crypto::{sha256, Hash, KeyPair, PublicKey},
    script::{Script, ScriptError},
    transaction::TxOut,
};
use serde::{Deserialize, Serialize};

/// Inputs to a miner-info document, one set per identity cycle
#[derive(Clone, Debug)]
pub struct MinerInfoParams {
    pub height: u64,
    pub name: String,
    pub public_ip: String,
    pub public_port: u16,
    pub miner_id: KeyPair,
    pub revocation: KeyPair,
    pub prev_miner_id: Option<KeyPair>,
    pub prev_revocation: Option<KeyPair>,
    pub compromised_miner_id: Option<PublicKey>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerInfoDocument {
    pub version: String,
    pub height: u64,
    pub prev_miner_id: String,
    pub prev_miner_id_sig: String,
    pub miner_id: String,
    pub prev_revocation_key: String,
    pub revocation_key: String,
    pub prev_revocation_key_sig: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_message: Option<RevocationMessage>,
    pub extensions: MinerInfoExtensions,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationMessage {
    #[serde(rename = "compromised_minerId")]
    pub compromised_miner_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerInfoExtensions {
    #[serde(rename = "publicIP")]
    pub public_ip: String,
    pub public_port: u16,
    pub miner_name: String,
}

/// Coinbase commitment to the miner-info transaction of a block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerInfoRef {
    pub miner_info_tx: Hash,
    pub height: u64,
}

// Sign the concatenation of two hex-encoded keys with `signer`
fn sign_key_rotation(signer: &KeyPair, prev: &str, current: &str) -> Result<String, ScriptError> {
    let digest = sha256(format!("{prev}{current}").as_bytes());
    Ok(hex::encode(signer.sign_digest(&digest)?))
}

impl MinerInfoDocument {
    pub fn from_params(params: &MinerInfoParams) -> Result<Self, ScriptError> {
        let miner_id = params.miner_id.public_key().to_hex();
        let prev_miner_key = params.prev_miner_id.as_ref().unwrap_or(&params.miner_id);
        let prev_miner_id = prev_miner_key.public_key().to_hex();

        let revocation_key = params.revocation.public_key().to_hex();
        let prev_revocation = params
            .prev_revocation
            .as_ref()
            .unwrap_or(&params.revocation);
        let prev_revocation_key = prev_revocation.public_key().to_hex();

        Ok(Self {
            version: MINER_INFO_DOCUMENT_VERSION.to_string(),
            height: params.height,
            prev_miner_id_sig: sign_key_rotation(prev_miner_key, &prev_miner_id, &miner_id)?,
            prev_miner_id,
            miner_id,
            prev_revocation_key_sig: sign_key_rotation(
                prev_revocation,
                &prev_revocation_key,
                &revocation_key,
            )?,
            prev_revocation_key,
            revocation_key,
            revocation_message: params
                .compromised_miner_id
                .as_ref()
                .map(|key| RevocationMessage {
                    compromised_miner_id: key.to_hex(),
                }),
            extensions: MinerInfoExtensions {
                public_ip: params.public_ip.clone(),
                public_port: params.public_port,
                miner_name: params.name.clone(),
            },
        })
    }

    pub fn miner_id_key(&self) -> Result<PublicKey, ScriptError> {
        let bytes = hex::decode(&self.miner_id)
            .map_err(|e| ScriptError::InvalidPayload(format!("minerId: {e}")))?;
        Ok(PublicKey::from_bytes(&bytes)?)
    }
}

/// `OP_FALSE OP_RETURN <protocol id> <version> <document> <signature>`
pub fn create_miner_info_script(params: &MinerInfoParams) -> Result<Script, ScriptError> {
    let document = MinerInfoDocument::from_params(params)?;
    let json = serde_json::to_vec(&document)
        .map_err(|e| ScriptError::InvalidPayload(e.to_string()))?;
    let signature = params.miner_id.sign_digest(&sha256(&json))?;
    Ok(Script::null_data(&[
        &MINER_INFO_PROTOCOL_ID[..],
        &[MINER_INFO_PROTOCOL_VERSION][..],
        &json[..],
        &signature[..],
    ]))
}

// Split a protocol output into (document bytes, signature)
fn protocol_payload<'a>(
    script: &'a Script,
    protocol_id: &[u8; 4],
) -> Result<(&'a [u8], &'a [u8]), ScriptError> {
    let pushes = script.null_data_pushes().ok_or(ScriptError::NonStandard)?;
    match pushes.as_slice() {
        [id, version, document, signature]
            if *id == protocol_id.as_slice() && *version == [MINER_INFO_PROTOCOL_VERSION] =>
        {
            Ok((*document, *signature))
        }
        _ => Err(ScriptError::InvalidPayload(format!(
            "not a {} output",
            hex::encode(protocol_id)
        ))),
    }
}

/// Decode a miner-info script and check the document signature
pub fn parse_miner_info_script(script: &Script) -> Result<MinerInfoDocument, ScriptError> {
    let (json, signature) = protocol_payload(script, &MINER_INFO_PROTOCOL_ID)?;
    let document: MinerInfoDocument = serde_json::from_slice(json)
        .map_err(|e| ScriptError::InvalidPayload(e.to_string()))?;
    document.miner_id_key()?.verify(&sha256(json), signature)?;
    Ok(document)
}

pub fn is_miner_info_script(script: &Script) -> bool {
    protocol_payload(script, &MINER_INFO_PROTOCOL_ID).is_ok()
}

/// Zero-value coinbase output committing to `miner_info_tx`
pub fn miner_info_ref_output(
    miner_info_tx: Hash,
    height: u64,
    miner_id: &KeyPair,
) -> Result<TxOut, ScriptError> {
    let reference = MinerInfoRef {
        miner_info_tx,
        height,
    };
    let json = serde_json::to_vec(&reference)
        .map_err(|e| ScriptError::InvalidPayload(e.to_string()))?;
    let signature = miner_id.sign_digest(&sha256(&json))?;
    let script = Script::null_data(&[
        &MINER_ID_PROTOCOL_ID[..],
        &[MINER_INFO_PROTOCOL_VERSION][..],
        &json[..],
        &signature[..],
    ]);
    Ok(TxOut::new(0, script))
}

/// Locate the miner-info reference in a block's coinbase, if any.
///
/// A present but undecodable reference is an error, not `None`.
pub fn find_miner_info_ref(block: &Block) -> Result<Option<MinerInfoRef>, ScriptError> {
    let Some(coinbase) = block.coinbase() else {
        return Ok(None);
    };
    for output in &coinbase.outputs {
        let Some(pushes) = output.script_pubkey.null_data_pushes() else {
            continue;
        };
        if pushes.first().copied() != Some(&MINER_ID_PROTOCOL_ID[..]) {
            continue;
        }
        let (json, _) = protocol_payload(&output.script_pubkey, &MINER_ID_PROTOCOL_ID)?;
        let reference = serde_json::from_slice(json)
            .map_err(|e| ScriptError::InvalidPayload(e.to_string()))?;
        return Ok(Some(reference));
    }
    Ok(None)
}
