mod address;
mod error;
mod hash;
mod keys;

pub use address::{decode_p2pkh_address, p2pkh_address};
pub use error::CryptoError;
pub use hash::{hash160, hash256, sha256, Hash, Hashable, HASH_SIZE};
pub use keys::{KeyPair, PublicKey, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE};
