use crate::crypto::{hash256, Hash, HASH_SIZE};
use crate::transaction::Transaction;

/// Bitcoin-style merkle root over transaction ids.
///
/// An odd node at any level is paired with itself. The empty list has the
/// zero root.
pub fn calculate_merkle_root(transactions: &[Transaction]) -> Hash {
    if transactions.is_empty() {
        return Hash::zero();
    }

    let mut hashes: Vec<Hash> = transactions.iter().map(|tx| tx.txid()).collect();
    while hashes.len() > 1 {
        hashes = hashes
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    hashes[0]
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut buf = [0u8; HASH_SIZE * 2];
    buf[..HASH_SIZE].copy_from_slice(left.as_bytes());
    buf[HASH_SIZE..].copy_from_slice(right.as_bytes());
    hash256(&buf)
}
