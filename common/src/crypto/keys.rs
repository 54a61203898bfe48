// secp256k1 key pairs derived from seeds with the BIP32 master-key rule.

use super::{hash::hash160, CryptoError};
use crate::config::REGTEST_XPRV_VERSION;
use hmac::{Hmac, Mac};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha2::Sha512;
use std::fmt::{Debug, Display, Formatter};

type HmacSha512 = Hmac<Sha512>;

pub const PUBLIC_KEY_SIZE: usize = 33;
pub const SECRET_KEY_SIZE: usize = 32;
const EXTENDED_KEY_SIZE: usize = 78;

/// Compressed secp256k1 public key
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        let point = self.0.to_encoded_point(true);
        let mut out = [0u8; PUBLIC_KEY_SIZE];
        out.copy_from_slice(point.as_bytes());
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn hash160(&self) -> [u8; 20] {
        hash160(&self.to_bytes())
    }

    /// Verify a DER signature over a 32-byte digest
    pub fn verify(&self, digest: &[u8; 32], der_signature: &[u8]) -> Result<(), CryptoError> {
        let signature =
            Signature::from_der(der_signature).map_err(|_| CryptoError::InvalidSignature)?;
        self.0
            .verify_prehash(digest, &signature)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// Secret key plus the chain code of the BIP32 master node it came from
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    chain_code: [u8; 32],
}

impl KeyPair {
    /// Derive the BIP32 master key for `seed`
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        let mut mac =
            HmacSha512::new_from_slice(b"Bitcoin seed").map_err(|_| CryptoError::InvalidSeed)?;
        mac.update(seed);
        let output = mac.finalize().into_bytes();
        let (secret, chain) = output.split_at(SECRET_KEY_SIZE);

        let signing_key = SigningKey::from_slice(secret).map_err(|_| CryptoError::InvalidSeed)?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(chain);

        Ok(Self {
            signing_key,
            chain_code,
        })
    }

    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_slice(secret).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self {
            signing_key,
            chain_code: [0u8; 32],
        })
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        let mut out = [0u8; SECRET_KEY_SIZE];
        out.copy_from_slice(&self.signing_key.to_bytes());
        out
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().clone())
    }

    /// Produce a low-S DER signature over a 32-byte digest
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
        let signature: Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|_| CryptoError::InvalidSignature)?;
        let signature = signature.normalize_s().unwrap_or(signature);
        Ok(signature.to_der().as_bytes().to_vec())
    }

    /// Base58check `tprv` serialisation of this master key
    pub fn to_extended_private_key(&self) -> String {
        let mut payload = Vec::with_capacity(EXTENDED_KEY_SIZE);
        payload.extend_from_slice(&REGTEST_XPRV_VERSION);
        payload.push(0); // depth
        payload.extend_from_slice(&[0u8; 4]); // parent fingerprint
        payload.extend_from_slice(&[0u8; 4]); // child number
        payload.extend_from_slice(&self.chain_code);
        payload.push(0);
        payload.extend_from_slice(&self.secret_bytes());
        bs58::encode(payload).with_check().into_string()
    }

    pub fn from_extended_private_key(encoded: &str) -> Result<Self, CryptoError> {
        let payload = bs58::decode(encoded)
            .with_check(None)
            .into_vec()
            .map_err(|_| CryptoError::InvalidChecksum)?;
        if payload.len() != EXTENDED_KEY_SIZE || payload[..4] != REGTEST_XPRV_VERSION {
            return Err(CryptoError::InvalidSecretKey);
        }
        if payload[45] != 0 {
            return Err(CryptoError::InvalidSecretKey);
        }

        let signing_key =
            SigningKey::from_slice(&payload[46..]).map_err(|_| CryptoError::InvalidSecretKey)?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&payload[13..45]);
        Ok(Self {
            signing_key,
            chain_code,
        })
    }
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.secret_bytes() == other.secret_bytes() && self.chain_code == other.chain_code
    }
}

impl Eq for KeyPair {}

impl Debug for KeyPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Never print secret material
        write!(f, "KeyPair({})", self.public_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;

    #[test]
    fn test_seed_derivation_is_deterministic() {
        let a = KeyPair::from_seed(&[0x02]).unwrap();
        let b = KeyPair::from_seed(&[0x02]).unwrap();
        let c = KeyPair::from_seed(&[0x03]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.public_key(), c.public_key());
    }

    #[test]
    fn test_bip32_test_vector_master_key() {
        // BIP32 test vector 1, seed 000102030405060708090a0b0c0d0e0f
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let key = KeyPair::from_seed(&seed).unwrap();
        assert_eq!(
            hex::encode(key.secret_bytes()),
            "e8f32e723decf4051aefac8e2c93c9c5b214313817cdb01a1494b917c8436b35"
        );
        assert_eq!(
            key.public_key().to_hex(),
            "0339a36013301597daef41fbe593a02cc513d0b55527ec2df1050e2e8ff49c85c2"
        );
    }

    #[test]
    fn test_sign_and_verify_digest() {
        let key = KeyPair::from_seed(b"signing").unwrap();
        let digest = sha256(b"attestation");
        let signature = key.sign_digest(&digest).unwrap();
        key.public_key().verify(&digest, &signature).unwrap();

        let other = sha256(b"something else");
        assert_eq!(
            key.public_key().verify(&other, &signature),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn test_extended_private_key_restores_same_key() {
        let key = KeyPair::from_seed(&[0x07]).unwrap();
        let encoded = key.to_extended_private_key();
        assert!(encoded.starts_with("tprv"));
        assert_eq!(KeyPair::from_extended_private_key(&encoded).unwrap(), key);
    }

    #[test]
    fn test_public_key_parse() {
        let key = KeyPair::from_seed(&[0x09]).unwrap();
        let bytes = key.public_key().to_bytes();
        assert_eq!(PublicKey::from_bytes(&bytes).unwrap(), key.public_key());
        assert!(PublicKey::from_bytes(&[0u8; 33]).is_err());
    }
}
