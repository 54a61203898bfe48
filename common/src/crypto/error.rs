use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Seed material did not produce a usable secp256k1 scalar
    #[error("Seed does not derive a valid secret key")]
    InvalidSeed,

    /// Secret key bytes are zero or not below the curve order
    #[error("Invalid secret key")]
    InvalidSecretKey,

    /// Public key is not a valid SEC1 encoding
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Signature is not valid DER or failed to produce
    #[error("Invalid signature encoding")]
    InvalidSignature,

    /// Signature does not verify against the given key and digest
    #[error("Signature verification failed")]
    VerificationFailed,

    /// Invalid checksum in a base58check string
    #[error("Invalid checksum")]
    InvalidChecksum,

    /// Address string is malformed or for the wrong network
    #[error("Invalid address format: {0}")]
    InvalidAddress(String),

    /// Hex decode error
    #[error("Failed to decode hex: {0}")]
    DecodeError(String),
}
