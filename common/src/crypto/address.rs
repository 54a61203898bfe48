use super::{CryptoError, PublicKey};
use crate::config::REGTEST_P2PKH_PREFIX;

/// Base58check regtest pay-to-pubkey-hash address for `key`
pub fn p2pkh_address(key: &PublicKey) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(REGTEST_P2PKH_PREFIX);
    payload.extend_from_slice(&key.hash160());
    bs58::encode(payload).with_check().into_string()
}

/// Recover the public key hash from a regtest P2PKH address
pub fn decode_p2pkh_address(address: &str) -> Result<[u8; 20], CryptoError> {
    let payload = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|_| CryptoError::InvalidChecksum)?;
    if payload.len() != 21 {
        return Err(CryptoError::InvalidAddress(address.to_string()));
    }
    if payload[0] != REGTEST_P2PKH_PREFIX {
        return Err(CryptoError::InvalidAddress(format!(
            "{} (version byte {:#04x})",
            address, payload[0]
        )));
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    Ok(hash)
}
