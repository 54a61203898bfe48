use super::{calculate_merkle_root, BlockHeader};
use crate::{
    config::{BLOCK_SUBSIDY, BLOCK_VERSION, GENESIS_TIME, REGTEST_BITS},
    crypto::{Hash, Hashable},
    script::Script,
    serializer::{Reader, ReaderError, Serializer, Writer},
    transaction::{Transaction, TxOut},
};
use log::trace;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Unsolved regtest block on top of `prev_block`
    pub fn new(prev_block: Hash, time: u32, transactions: Vec<Transaction>) -> Self {
        let merkle_root = calculate_merkle_root(&transactions);
        Self {
            header: BlockHeader {
                version: BLOCK_VERSION,
                prev_block,
                merkle_root,
                time,
                bits: REGTEST_BITS,
                nonce: 0,
            },
            transactions,
        }
    }

    /// Deterministic genesis block shared by every simulated node
    pub fn genesis() -> Self {
        let coinbase = Transaction::coinbase(
            0,
            b"minerid regtest genesis",
            vec![TxOut::new(BLOCK_SUBSIDY, Script::null_data(&[b"genesis"]))],
        );
        let mut block = Self::new(Hash::zero(), GENESIS_TIME, vec![coinbase]);
        block.solve();
        block
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    pub fn txids(&self) -> Vec<Hash> {
        self.transactions.iter().map(|tx| tx.txid()).collect()
    }

    pub fn has_valid_merkle_root(&self) -> bool {
        calculate_merkle_root(&self.transactions) == self.header.merkle_root
    }

    /// Recompute the merkle root after the transaction list changed
    pub fn update_merkle_root(&mut self) {
        self.header.merkle_root = calculate_merkle_root(&self.transactions);
    }

    /// Grind the nonce until the header hash meets its target
    pub fn solve(&mut self) {
        let mut attempts = 0u64;
        while !self.header.meets_target() {
            self.header.nonce = self.header.nonce.wrapping_add(1);
            if self.header.nonce == 0 {
                self.header.time = self.header.time.wrapping_add(1);
            }
            attempts += 1;
        }
        trace!("solved block {} after {} attempts", self.hash(), attempts);
    }
}

impl Serializer for Block {
    fn write(&self, writer: &mut Writer) {
        self.header.write(writer);
        self.transactions.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let header = BlockHeader::read(reader)?;
        let transactions = Vec::<Transaction>::read(reader)?;
        Ok(Self {
            header,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_is_deterministic_and_solved() {
        let a = Block::genesis();
        let b = Block::genesis();
        assert_eq!(a.hash(), b.hash());
        assert!(a.header.meets_target());
        assert!(a.has_valid_merkle_root());
        assert_eq!(a.coinbase().and_then(|cb| cb.coinbase_height()), Some(0));
    }

    #[test]
    fn test_block_hex_round_trip() {
        let genesis = Block::genesis();
        let coinbase = Transaction::coinbase(
            1,
            b"test",
            vec![TxOut::new(BLOCK_SUBSIDY, Script::anyone_can_spend())],
        );
        let mut block = Block::new(genesis.hash(), genesis.header.time + 1, vec![coinbase]);
        block.solve();

        let decoded = Block::from_hex(&block.to_hex()).unwrap();
        assert_eq!(decoded.hash(), block.hash());
        assert_eq!(decoded.header.prev_block, genesis.hash());
    }

    #[test]
    fn test_tampered_transactions_break_merkle_root() {
        let mut block = Block::genesis();
        block.transactions[0].outputs[0].value -= 1;
        assert!(!block.has_valid_merkle_root());
        block.update_merkle_root();
        assert!(block.has_valid_merkle_root());
    }
}
