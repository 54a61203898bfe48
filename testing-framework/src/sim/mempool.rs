// Insertion-ordered transaction pool of one simulated node.

use super::chain::UtxoSet;
use indexmap::IndexMap;
use log::trace;
use minerid_common::{
    crypto::Hash,
    transaction::{verify_input, OutPoint, Transaction, TxOut},
};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub fee: u64,
}

#[derive(Debug, Default)]
pub struct Mempool {
    entries: IndexMap<Hash, MempoolEntry>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, txid: &Hash) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash) -> Option<&Transaction> {
        self.entries.get(txid).map(|entry| &entry.tx)
    }

    pub fn txids(&self) -> Vec<Hash> {
        self.entries.keys().copied().collect()
    }

    /// Entries in admission order, parents before children
    pub fn entries(&self) -> impl Iterator<Item = &MempoolEntry> + '_ {
        self.entries.values()
    }

    /// Txid of the pool transaction spending `outpoint`
    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<Hash> {
        self.entries
            .iter()
            .find(|(_, entry)| {
                entry
                    .tx
                    .inputs
                    .iter()
                    .any(|input| input.previous_output == *outpoint)
            })
            .map(|(txid, _)| *txid)
    }

    /// Output created by a pool transaction
    pub fn output(&self, outpoint: &OutPoint) -> Option<&TxOut> {
        self.entries
            .get(&outpoint.txid)
            .and_then(|entry| entry.tx.outputs.get(outpoint.vout as usize))
    }

    /// Admit `tx` on top of `utxos`, the coins at the current tip.
    /// `next_height` is the height of the block that would include it.
    pub fn admit(
        &mut self,
        tx: Transaction,
        utxos: &UtxoSet,
        next_height: u64,
        maturity: u64,
    ) -> Result<Hash, String> {
        if tx.is_coinbase() {
            return Err("coinbase".to_string());
        }
        let txid = tx.txid();
        if self.contains(&txid) {
            return Err("txn-already-in-mempool".to_string());
        }
        if (0..tx.outputs.len() as u32).any(|vout| utxos.contains_key(&OutPoint::new(txid, vout))) {
            return Err("txn-already-known".to_string());
        }

        let mut seen = HashSet::new();
        let mut input_value = 0u64;
        for (index, input) in tx.inputs.iter().enumerate() {
            let outpoint = &input.previous_output;
            if !seen.insert(*outpoint) {
                return Err("bad-txns-inputs-duplicate".to_string());
            }
            if self.spender_of(outpoint).is_some() {
                return Err("txn-mempool-conflict".to_string());
            }
            let prev_out = match utxos.get(outpoint) {
                Some(coin) => {
                    if coin.is_coinbase && next_height - coin.height < maturity {
                        return Err("bad-txns-premature-spend-of-coinbase".to_string());
                    }
                    &coin.output
                }
                None => self
                    .output(outpoint)
                    .ok_or_else(|| "missing-inputs".to_string())?,
            };
            verify_input(&tx, index, prev_out)
                .map_err(|e| format!("mandatory-script-verify-flag-failed ({})", e))?;
            input_value += prev_out.value;
        }

        let output_value = tx.output_value();
        if output_value > input_value {
            return Err("bad-txns-in-belowout".to_string());
        }
        self.entries.insert(
            txid,
            MempoolEntry {
                tx,
                fee: input_value - output_value,
            },
        );
        Ok(txid)
    }

    /// Insert without any checks
    pub fn insert_unchecked(&mut self, tx: Transaction) {
        self.entries
            .entry(tx.txid())
            .or_insert(MempoolEntry { tx, fee: 0 });
    }

    /// Remove every entry, in admission order
    pub fn drain(&mut self) -> Vec<Transaction> {
        self.entries.drain(..).map(|(_, entry)| entry.tx).collect()
    }

    /// Re-admit `candidates` in order against a new tip, dropping what no
    /// longer fits. Returns how many were dropped.
    pub fn readmit(
        &mut self,
        candidates: Vec<Transaction>,
        utxos: &UtxoSet,
        next_height: u64,
        maturity: u64,
    ) -> usize {
        let mut dropped = 0;
        for tx in candidates {
            let txid = tx.txid();
            if let Err(reason) = self.admit(tx, utxos, next_height, maturity) {
                trace!("not re-admitting {}: {}", txid, reason);
                dropped += 1;
            }
        }
        dropped
    }

    pub fn total_fees(&self) -> u64 {
        self.entries.values().map(|entry| entry.fee).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::super::chain::Coin;
    use super::*;
    use minerid_common::{
        config::{BLOCK_SUBSIDY, COINBASE_MATURITY},
        crypto::KeyPair,
        script::Script,
        transaction::{sign_p2pkh_input, TxIn},
    };

    struct Fixture {
        key: KeyPair,
        funding: OutPoint,
        funding_out: TxOut,
        utxos: UtxoSet,
    }

    fn fixture() -> Fixture {
        let key = KeyPair::from_seed(&[0x31]).unwrap();
        let funding_out = TxOut::new(1_000_000, Script::p2pkh(&key.public_key().hash160()));
        let funding = OutPoint::new(minerid_common::crypto::hash256(b"funding"), 0);
        let mut utxos = UtxoSet::new();
        utxos.insert(
            funding,
            Coin {
                output: funding_out.clone(),
                height: 5,
                is_coinbase: false,
            },
        );
        Fixture {
            key,
            funding,
            funding_out,
            utxos,
        }
    }

    fn spend(fx: &Fixture, prev: OutPoint, prev_out: &TxOut, value: u64) -> Transaction {
        let mut tx = Transaction::new(
            vec![TxIn::unsigned(prev)],
            vec![TxOut::new(value, prev_out.script_pubkey.clone())],
        );
        sign_p2pkh_input(&mut tx, 0, &fx.key, prev_out).unwrap();
        tx
    }

    #[test]
    fn test_chained_admission_and_fees() {
        let fx = fixture();
        let mut pool = Mempool::new();
        let parent = spend(&fx, fx.funding, &fx.funding_out, 999_500);
        let parent_id = pool.admit(parent.clone(), &fx.utxos, 6, COINBASE_MATURITY).unwrap();

        let child = spend(&fx, parent.outpoint(0), &parent.outputs[0], 999_000);
        pool.admit(child, &fx.utxos, 6, COINBASE_MATURITY).unwrap();

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.txids()[0], parent_id);
        assert_eq!(pool.total_fees(), 1_000);
        assert_eq!(pool.spender_of(&fx.funding), Some(parent_id));
    }

    #[test]
    fn test_conflicts_and_missing_inputs() {
        let fx = fixture();
        let mut pool = Mempool::new();
        let first = spend(&fx, fx.funding, &fx.funding_out, 999_500);
        pool.admit(first.clone(), &fx.utxos, 6, COINBASE_MATURITY).unwrap();

        let double = spend(&fx, fx.funding, &fx.funding_out, 999_000);
        assert_eq!(
            pool.admit(double, &fx.utxos, 6, COINBASE_MATURITY).err().as_deref(),
            Some("txn-mempool-conflict")
        );
        assert_eq!(
            pool.admit(first, &fx.utxos, 6, COINBASE_MATURITY).err().as_deref(),
            Some("txn-already-in-mempool")
        );

        let orphan = spend(&fx, OutPoint::new(Hash::zero(), 3), &fx.funding_out, 1);
        assert_eq!(
            pool.admit(orphan, &fx.utxos, 6, COINBASE_MATURITY).err().as_deref(),
            Some("missing-inputs")
        );

        let greedy = spend(&fx, OutPoint::new(Hash::zero(), 0), &fx.funding_out, 1);
        assert!(pool.admit(greedy, &fx.utxos, 6, COINBASE_MATURITY).is_err());
    }

    #[test]
    fn test_immature_coinbase_spend_rejected() {
        let fx = fixture();
        let coinbase = Transaction::coinbase(
            10,
            b"test",
            vec![TxOut::new(BLOCK_SUBSIDY, Script::anyone_can_spend())],
        );
        let mut utxos = fx.utxos.clone();
        utxos.insert(
            coinbase.outpoint(0),
            Coin {
                output: coinbase.outputs[0].clone(),
                height: 10,
                is_coinbase: true,
            },
        );
        let tx = Transaction::new(
            vec![TxIn::unsigned(coinbase.outpoint(0))],
            vec![TxOut::new(BLOCK_SUBSIDY, Script::anyone_can_spend())],
        );
        let mut pool = Mempool::new();
        assert_eq!(
            pool.admit(tx.clone(), &utxos, 109, COINBASE_MATURITY).err().as_deref(),
            Some("bad-txns-premature-spend-of-coinbase")
        );
        pool.admit(tx, &utxos, 110, COINBASE_MATURITY).unwrap();
    }

    #[test]
    fn test_readmit_drops_what_no_longer_fits() {
        let fx = fixture();
        let mut pool = Mempool::new();
        let parent = spend(&fx, fx.funding, &fx.funding_out, 999_500);
        let child = spend(&fx, parent.outpoint(0), &parent.outputs[0], 999_000);
        pool.admit(parent.clone(), &fx.utxos, 6, COINBASE_MATURITY).unwrap();
        pool.admit(child.clone(), &fx.utxos, 6, COINBASE_MATURITY).unwrap();

        // Parent got confirmed: its input is gone, its output is a coin now
        let mut utxos = UtxoSet::new();
        utxos.insert(
            parent.outpoint(0),
            Coin {
                output: parent.outputs[0].clone(),
                height: 6,
                is_coinbase: false,
            },
        );
        let candidates = pool.drain();
        assert!(pool.is_empty());
        let dropped = pool.readmit(candidates, &utxos, 7, COINBASE_MATURITY);
        assert_eq!(dropped, 1);
        assert_eq!(pool.txids(), vec![child.txid()]);
    }
}
