// File: testing-framework/src/funding.rs
//
// Funding Lifecycle
//
// A participant pays for its miner-info transactions from a funding lineage:
// a harness-mined anyone-can-spend coinbase is split into two equal P2PKH
// outputs owned by the participant's funding key, and the first of them is
// recorded on disk where the node looks for it.

use crate::config::FundingWriteMode;
use crate::error::{HarnessError, HarnessResult};
use crate::keys::ParticipantKeySet;
use crate::node::{BlockAcceptance, NodeRpc, TxAcceptance};
use crate::utilities::storage::FundingStore;
use log::{debug, info};
use minerid_common::{
    block::Block,
    config::BLOCK_SUBSIDY,
    crypto::{p2pkh_address, KeyPair},
    script::Script,
    transaction::{OutPoint, Transaction, TxIn, TxOut},
};
use serde::Serialize;
use std::path::Path;

/// Where a participant's miner-info transactions draw their funds from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FundingRecord {
    /// Base58 P2PKH address both split outputs pay to
    pub destination: String,
    /// First output of the split transaction, the root of the lineage
    pub first_outpoint: OutPoint,
    #[serde(skip)]
    pub private_key: KeyPair,
}

pub struct FundingLifecycleManager {
    mode: FundingWriteMode,
}

impl FundingLifecycleManager {
    pub fn new(mode: FundingWriteMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> FundingWriteMode {
        self.mode
    }

    /// Submit a block on `node`'s tip whose coinbase pays the full subsidy to
    /// an anyone-can-spend output. Returns that coinbase, which becomes the
    /// funding source once it matures.
    pub async fn mine_funding_source(
        &self,
        node: &dyn NodeRpc,
        tag: &str,
    ) -> HarnessResult<Transaction> {
        let label = node.label();
        let tip = node
            .get_tip()
            .await
            .map_err(|e| HarnessError::rpc(label, e))?;
        let height = tip.height + 1;

        let coinbase = Transaction::coinbase(
            height,
            tag.as_bytes(),
            vec![TxOut::new(BLOCK_SUBSIDY, Script::anyone_can_spend())],
        );
        let mut block = Block::new(tip.hash, tip.time + 1, vec![coinbase.clone()]);
        block.solve();
        let hash = block.hash();

        match node
            .submit_block(&block)
            .await
            .map_err(|e| HarnessError::rpc(label, e))?
        {
            BlockAcceptance::Accepted => {
                info!(
                    "{}: funding source {} mined in block {} at height {}",
                    label,
                    coinbase.txid(),
                    hash,
                    height
                );
                Ok(coinbase)
            }
            BlockAcceptance::Rejected(reason) => Err(HarnessError::BlockRejected {
                node: label.to_string(),
                hash,
                reason,
            }),
        }
    }

    /// Split output 0 of `source` into two equal outputs locked to the
    /// funding key, broadcast the split and persist the funding record under
    /// `datadir`.
    ///
    /// The split must be admitted to the node's mempool. There is no retry:
    /// a participant without funding cannot run any cycle.
    pub async fn fund(
        &self,
        node: &dyn NodeRpc,
        keys: &ParticipantKeySet,
        datadir: &Path,
        source: &Transaction,
    ) -> HarnessResult<(Transaction, FundingRecord)> {
        let label = node.label();
        let source_out = source.outputs.first().ok_or_else(|| {
            HarnessError::Scenario(format!("funding source {} has no outputs", source.txid()))
        })?;

        let funding_key = keys.funding.public_key();
        let lock = Script::p2pkh(&funding_key.hash160());
        // an odd satoshi goes to the fee
        let half = source_out.value / 2;
        let split = Transaction::new(
            vec![TxIn::unsigned(source.outpoint(0))],
            vec![TxOut::new(half, lock.clone()), TxOut::new(half, lock)],
        );
        let txid = split.txid();

        let rejected = |reason: String| HarnessError::FundingRejected {
            node: label.to_string(),
            txid,
            reason,
        };

        match node
            .send_raw_transaction(&split)
            .await
            .map_err(|e| HarnessError::rpc(label, e))?
        {
            TxAcceptance::Accepted(accepted) if accepted == txid => {}
            TxAcceptance::Accepted(other) => {
                return Err(rejected(format!("node reported txid {}", other)))
            }
            TxAcceptance::Rejected(reason) => return Err(rejected(reason)),
        }

        let mempool = node
            .get_raw_mempool()
            .await
            .map_err(|e| HarnessError::rpc(label, e))?;
        if !mempool.contains(&txid) {
            return Err(rejected("accepted but missing from mempool".to_string()));
        }

        let record = FundingRecord {
            destination: p2pkh_address(&funding_key),
            first_outpoint: split.outpoint(0),
            private_key: keys.funding.clone(),
        };
        let store = FundingStore::new(datadir).with_mode(self.mode);
        store.save(&record).await?;
        debug!(
            "{}: funding record saved to {} ({} mode)",
            label,
            store.dir().display(),
            self.mode
        );
        info!(
            "{}: funded {} with {} x2 via {}",
            label, record.destination, half, txid
        );

        Ok((split, record))
    }
}
