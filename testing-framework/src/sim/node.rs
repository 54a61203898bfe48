// RPC handle onto one node of the simulated network.

use super::network::SimNetwork;
use crate::node::rpc_client::{RpcError, RPC_INVALID_ADDRESS_OR_KEY, RPC_MISC_ERROR};
use crate::node::{BlockAcceptance, BlockInfo, NodeRpc, TxAcceptance};
use crate::utilities::storage::FundingStore;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use minerid_common::{
    block::Block,
    crypto::{decode_p2pkh_address, Hash},
    miner_info::parse_miner_info_script,
    script::Script,
    transaction::{sign_p2pkh_input, OutPoint, Transaction, TxIn, TxOut},
};
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct SimNode {
    network: SimNetwork,
    index: usize,
    label: String,
    address: String,
    datadir: PathBuf,
}

impl SimNode {
    pub(super) fn new(
        network: SimNetwork,
        index: usize,
        label: String,
        address: String,
        datadir: PathBuf,
    ) -> Self {
        Self {
            network,
            index,
            label,
            address,
            datadir,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Directory the node reads its miner-id funding files from
    pub fn datadir(&self) -> &Path {
        &self.datadir
    }

    /// Build, sign and submit a miner-info transaction spending the tip of
    /// the funding lineage
    async fn build_miner_info_tx(&self, script: &Script) -> Result<Hash> {
        let funding = FundingStore::new(&self.datadir)
            .load()
            .await
            .with_context(|| format!("{}: miner-id funding is not configured", self.label))?;
        let destination = decode_p2pkh_address(&funding.destination)?;
        let document = parse_miner_info_script(script)
            .map_err(|e| anyhow!("{}: invalid miner-info script: {}", self.label, e))?;

        self.network.with_state(|state, now| {
            let fee = state.config.miner_info_fee;
            let node = &state.nodes[self.index];
            let next_height = node.chain.height() + 1;
            if document.height != next_height {
                bail!(
                    "{}: miner-info document height {} does not match next block height {}",
                    self.label,
                    document.height,
                    next_height
                );
            }

            // Follow the lineage: every miner-info transaction spends the
            // change output of the previous one.
            let spends = node.spends();
            let mut outpoint = funding.first_outpoint;
            while let Some(spender) = spends.get(&outpoint) {
                outpoint = OutPoint::new(*spender, 1);
            }
            let prev_out = node.find_output(&outpoint).ok_or_else(|| {
                anyhow!("{}: funding output {} is not spendable", self.label, outpoint)
            })?;
            if prev_out.value <= fee {
                bail!(
                    "{}: funding output {} holds {} which does not cover the fee",
                    self.label,
                    outpoint,
                    prev_out.value
                );
            }

            let mut tx = Transaction::new(
                vec![TxIn::unsigned(outpoint)],
                vec![
                    TxOut::new(0, script.clone()),
                    TxOut::new(prev_out.value - fee, Script::p2pkh(&destination)),
                ],
            );
            sign_p2pkh_input(&mut tx, 0, &funding.private_key, &prev_out)?;
            debug!(
                "{} built miner-info tx {} for height {} spending {}",
                self.label,
                tx.txid(),
                next_height,
                outpoint
            );
            state
                .submit_transaction(self.index, tx, now)
                .map_err(|reason| anyhow!("{}: miner-info transaction rejected: {}", self.label, reason))
        })
    }
}

#[async_trait]
impl NodeRpc for SimNode {
    fn label(&self) -> &str {
        &self.label
    }

    fn p2p_address(&self) -> String {
        self.address.clone()
    }

    async fn get_best_block_hash(&self) -> Result<Hash> {
        Ok(self
            .network
            .with_state(|state, _| state.nodes[self.index].chain.tip().hash))
    }

    async fn get_block_count(&self) -> Result<u64> {
        Ok(self
            .network
            .with_state(|state, _| state.nodes[self.index].chain.height()))
    }

    async fn get_block(&self, hash: &Hash) -> Result<BlockInfo> {
        self.network.with_state(|state, _| {
            let entry = state.nodes[self.index]
                .chain
                .get(hash)
                .ok_or_else(|| anyhow!("{}: Block not found: {}", self.label, hash))?;
            Ok(BlockInfo {
                hash: entry.hash,
                height: entry.height,
                time: entry.block.header.time,
                prev_hash: (entry.height > 0).then_some(entry.block.header.prev_block),
                txids: entry.block.txids(),
            })
        })
    }

    async fn get_block_hash(&self, height: u64) -> Result<Hash> {
        self.network.with_state(|state, _| {
            state.nodes[self.index]
                .chain
                .hash_at(height)
                .ok_or_else(|| anyhow!("{}: Block height out of range: {}", self.label, height))
        })
    }

    async fn get_raw_transaction(&self, txid: &Hash) -> Result<Transaction> {
        self.network.with_state(|state, _| {
            state.nodes[self.index]
                .find_transaction(txid)
                .ok_or_else(|| {
                    anyhow::Error::new(RpcError {
                        code: RPC_INVALID_ADDRESS_OR_KEY,
                        message: format!("No such mempool or blockchain transaction: {}", txid),
                    })
                    .context(format!("{}: getrawtransaction", self.label))
                })
        })
    }

    async fn create_miner_info_tx(&self, script: &Script) -> Result<Hash> {
        // Any failure is a node-side error object, not a transport failure
        self.build_miner_info_tx(script).await.map_err(|e| {
            anyhow::Error::new(RpcError {
                code: RPC_MISC_ERROR,
                message: format!("{:#}", e),
            })
        })
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<TxAcceptance> {
        Ok(self.network.with_state(|state, now| {
            match state.submit_transaction(self.index, tx.clone(), now) {
                Ok(txid) => TxAcceptance::Accepted(txid),
                Err(reason) => TxAcceptance::Rejected(reason),
            }
        }))
    }

    async fn submit_block(&self, block: &Block) -> Result<BlockAcceptance> {
        Ok(self.network.with_state(|state, now| {
            match state.submit_block(self.index, block.clone(), now) {
                Ok(()) => BlockAcceptance::Accepted,
                Err(reason) => BlockAcceptance::Rejected(reason),
            }
        }))
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Hash>> {
        Ok(self
            .network
            .with_state(|state, _| state.nodes[self.index].mempool.txids()))
    }

    async fn generate(&self, blocks: u64) -> Result<Vec<Hash>> {
        self.network.with_state(|state, now| {
            let mut hashes = Vec::with_capacity(blocks as usize);
            for _ in 0..blocks {
                let hash = state
                    .generate(self.index, now)
                    .map_err(|reason| anyhow!("{}: generated block rejected: {}", self.label, reason))?;
                hashes.push(hash);
            }
            Ok(hashes)
        })
    }

    async fn invalidate_block(&self, hash: &Hash) -> Result<()> {
        self.network.with_state(|state, _| {
            state
                .invalidate(self.index, hash)
                .map_err(|reason| anyhow!("{}: {}", self.label, reason))
        })
    }

    async fn add_peer(&self, address: &str) -> Result<()> {
        self.network.with_state(|state, now| {
            let peer = state
                .index_of(address)
                .ok_or_else(|| anyhow!("{}: unknown peer address {}", self.label, address))?;
            state.connect(self.index, peer, now);
            Ok(())
        })
    }

    async fn disconnect_peer(&self, address: &str) -> Result<()> {
        self.network.with_state(|state, _| {
            let peer = state
                .index_of(address)
                .ok_or_else(|| anyhow!("{}: unknown peer address {}", self.label, address))?;
            if !state.disconnect(self.index, peer) {
                bail!("{}: Node not found in connected nodes", self.label);
            }
            Ok(())
        })
    }

    async fn get_peers(&self) -> Result<Vec<String>> {
        Ok(self.network.with_state(|state, _| {
            state
                .peers_of(self.index)
                .into_iter()
                .map(|peer| state.nodes[peer].address.clone())
                .collect()
        }))
    }
}
