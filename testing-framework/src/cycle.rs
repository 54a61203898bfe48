// File: testing-framework/src/cycle.rs
//
// Identity Transaction Cycle
//
// One cycle asks a participant's node to build and broadcast a miner-info
// transaction for the next height, waits for it to reach the mempool and,
// when mining, submits a block whose coinbase references it:
//
//   Built -> Broadcast -> MempoolPending -> Mined
//                                        -> LeftPending

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::invariants::InvariantChecker;
use crate::keys::ParticipantKeySet;
use crate::node::{
    wait_for_height, wait_for_mempool_tx, BlockAcceptance, ChainView, NodeRpc, RpcError, TipInfo,
    WaitPolicy,
};
use crate::orchestrator::Clock;
use log::{debug, info};
use minerid_common::{
    block::Block,
    config::BLOCK_SUBSIDY,
    crypto::Hash,
    miner_info::{create_miner_info_script, miner_info_ref_output, MinerInfoParams},
    script::Script,
    transaction::{Transaction, TxOut},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Built,
    Broadcast,
    MempoolPending,
    Mined,
    LeftPending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CycleOutcome {
    Mined { block: Hash, height: u64 },
    LeftPending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Identity transaction broadcast by this cycle
    pub txid: Hash,
    /// Height the identity transaction was built for
    pub height: u64,
    pub states: Vec<CycleState>,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    pub fn final_state(&self) -> Option<CycleState> {
        self.states.last().copied()
    }

    pub fn mined_block(&self) -> Option<Hash> {
        match self.outcome {
            CycleOutcome::Mined { block, .. } => Some(block),
            CycleOutcome::LeftPending => None,
        }
    }
}

/// Block assembled by the harness on a known parent
///
/// Only valid against the tip it was built on. Submitting after that tip
/// moved yields [`HarnessError::StaleCandidate`].
#[derive(Debug, Clone)]
pub struct CandidateBlock {
    block: Block,
    parent: Hash,
    height: u64,
}

impl CandidateBlock {
    /// Solved block on `tip` holding `transactions` after a coinbase paying
    /// the subsidy to an anyone-can-spend output followed by
    /// `extra_outputs`
    pub fn build(
        tip: &TipInfo,
        tag: &[u8],
        extra_outputs: Vec<TxOut>,
        transactions: Vec<Transaction>,
    ) -> Self {
        let height = tip.height + 1;
        let mut outputs = vec![TxOut::new(BLOCK_SUBSIDY, Script::anyone_can_spend())];
        outputs.extend(extra_outputs);

        let mut all = Vec::with_capacity(transactions.len() + 1);
        all.push(Transaction::coinbase(height, tag, outputs));
        all.extend(transactions);

        let mut block = Block::new(tip.hash, tip.time + 1, all);
        block.solve();
        Self {
            block,
            parent: tip.hash,
            height,
        }
    }

    pub fn hash(&self) -> Hash {
        self.block.hash()
    }

    pub fn parent(&self) -> &Hash {
        &self.parent
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub async fn submit(&self, node: &dyn NodeRpc) -> HarnessResult<()> {
        let label = node.label();
        let tip = node
            .get_best_block_hash()
            .await
            .map_err(|e| HarnessError::rpc(label, e))?;
        if tip != self.parent {
            return Err(self.stale(label, tip));
        }

        let hash = self.hash();
        match node
            .submit_block(&self.block)
            .await
            .map_err(|e| HarnessError::rpc(label, e))?
        {
            BlockAcceptance::Accepted => {
                debug!("{} accepted candidate {} at height {}", label, hash, self.height);
                Ok(())
            }
            BlockAcceptance::Rejected(reason) => {
                let tip = node
                    .get_best_block_hash()
                    .await
                    .map_err(|e| HarnessError::rpc(label, e))?;
                if tip != self.parent && tip != hash {
                    return Err(self.stale(label, tip));
                }
                Err(HarnessError::BlockRejected {
                    node: label.to_string(),
                    hash,
                    reason,
                })
            }
        }
    }

    fn stale(&self, node: &str, tip: Hash) -> HarnessError {
        HarnessError::StaleCandidate {
            node: node.to_string(),
            built_on: self.parent,
            tip,
        }
    }
}

pub struct IdentityTransactionCycle {
    clock: Arc<dyn Clock>,
    policy: WaitPolicy,
    public_ip: String,
    public_port: u16,
}

impl IdentityTransactionCycle {
    pub fn new(
        clock: Arc<dyn Clock>,
        policy: WaitPolicy,
        public_ip: impl Into<String>,
        public_port: u16,
    ) -> Self {
        Self {
            clock,
            policy,
            public_ip: public_ip.into(),
            public_port,
        }
    }

    pub fn from_config(clock: Arc<dyn Clock>, config: &HarnessConfig) -> Self {
        Self::new(
            clock,
            config.wait_policy(),
            config.public_ip.clone(),
            config.public_port,
        )
    }

    /// Miner-info parameters for `height`. The reorg scenario declares no
    /// key rotation, so previous and compromised keys stay unset.
    pub fn params(&self, keys: &ParticipantKeySet, height: u64, name: &str) -> MinerInfoParams {
        MinerInfoParams {
            height,
            name: name.to_string(),
            public_ip: self.public_ip.clone(),
            public_port: self.public_port,
            miner_id: keys.miner_id.clone(),
            revocation: keys.revocation.clone(),
            prev_miner_id: None,
            prev_revocation: None,
            compromised_miner_id: None,
        }
    }

    /// Run one cycle for the block at `height`, which must be the node's
    /// tip height plus one. Nothing is retried: every failure ends the cycle.
    pub async fn run_cycle(
        &self,
        node: &dyn NodeRpc,
        keys: &ParticipantKeySet,
        height: u64,
        name: &str,
        mine: bool,
    ) -> HarnessResult<CycleReport> {
        let label = node.label();
        let tip = node
            .get_tip()
            .await
            .map_err(|e| HarnessError::rpc(label, e))?;
        if tip.height + 1 != height {
            return Err(HarnessError::StaleHeight {
                node: label.to_string(),
                requested: height,
                tip_height: tip.height,
            });
        }

        let script = create_miner_info_script(&self.params(keys, height, name))?;
        let mut states = vec![CycleState::Built];

        let txid = node
            .create_miner_info_tx(&script)
            .await
            .map_err(|e| {
                if RpcError::classify(&e).is_some_and(RpcError::is_refusal) {
                    HarnessError::MinerInfoRejected {
                        node: label.to_string(),
                        height,
                        reason: e,
                    }
                } else {
                    HarnessError::rpc(label, e)
                }
            })?;
        states.push(CycleState::Broadcast);

        wait_for_mempool_tx(self.clock.as_ref(), &self.policy, node, &txid)
            .await
            .map_err(|source| HarnessError::MempoolAdmissionTimeout { txid, source })?;
        states.push(CycleState::MempoolPending);
        debug!("{}: miner-info tx {} pending for height {}", label, txid, height);

        if !mine {
            let view = self.capture(node).await?;
            InvariantChecker::tx_in_mempool(&view, &txid)?;
            InvariantChecker::height_eq(&view, tip.height)?;
            states.push(CycleState::LeftPending);
            info!(
                "{}: miner-info tx {} left pending at height {}",
                label, txid, tip.height
            );
            return Ok(CycleReport {
                txid,
                height,
                states,
                outcome: CycleOutcome::LeftPending,
            });
        }

        let identity_tx = node
            .get_raw_transaction(&txid)
            .await
            .map_err(|e| HarnessError::rpc(label, e))?;
        let transactions = self.with_unconfirmed_ancestors(node, identity_tx).await?;
        let reference = miner_info_ref_output(txid, height, &keys.miner_id)?;
        let tag = format!("{}/{}", name, height);
        let candidate = CandidateBlock::build(&tip, tag.as_bytes(), vec![reference], transactions);
        let hash = candidate.hash();
        candidate.submit(node).await?;

        wait_for_height(self.clock.as_ref(), &self.policy, node, height)
            .await
            .map_err(|source| HarnessError::BlockAcceptanceTimeout { hash, source })?;

        let view = self.capture(node).await?;
        InvariantChecker::tip_is(&view, &hash)?;
        let block = node
            .get_block(&hash)
            .await
            .map_err(|e| HarnessError::rpc(label, e))?;
        InvariantChecker::mined_exactly_once(&view, &block, &txid)?;
        states.push(CycleState::Mined);
        info!(
            "{}: miner-info tx {} mined in block {} at height {}",
            label, txid, hash, height
        );

        Ok(CycleReport {
            txid,
            height,
            states,
            outcome: CycleOutcome::Mined {
                block: hash,
                height,
            },
        })
    }

    async fn capture(&self, node: &dyn NodeRpc) -> HarnessResult<ChainView> {
        ChainView::capture(node)
            .await
            .map_err(|e| HarnessError::rpc(node.label(), e))
    }

    /// `tx` preceded by every mempool transaction it depends on, parents
    /// before children
    async fn with_unconfirmed_ancestors(
        &self,
        node: &dyn NodeRpc,
        tx: Transaction,
    ) -> HarnessResult<Vec<Transaction>> {
        let label = node.label();
        let mempool: HashSet<Hash> = node
            .get_raw_mempool()
            .await
            .map_err(|e| HarnessError::rpc(label, e))?
            .into_iter()
            .collect();

        let mut ordered = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![(tx, false)];
        while let Some((tx, expanded)) = stack.pop() {
            if expanded {
                ordered.push(tx);
                continue;
            }
            if !visited.insert(tx.txid()) {
                continue;
            }
            let parents: Vec<Hash> = tx
                .inputs
                .iter()
                .map(|input| input.previous_output.txid)
                .filter(|txid| mempool.contains(txid) && !visited.contains(txid))
                .collect();
            stack.push((tx, true));
            for parent in parents {
                let parent_tx = node
                    .get_raw_transaction(&parent)
                    .await
                    .map_err(|e| HarnessError::rpc(label, e))?;
                stack.push((parent_tx, false));
            }
        }

        if ordered.len() > 1 {
            debug!(
                "{}: candidate carries {} unconfirmed ancestor(s)",
                label,
                ordered.len() - 1
            );
        }
        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FundingWriteMode;
    use crate::error::ErrorKind;
    use crate::funding::FundingLifecycleManager;
    use crate::keys::KeyMaterialProvisioner;
    use crate::orchestrator::{PausedClock, SeedSequence};
    use crate::sim::{SimConfig, SimNetwork, SimNode};
    use crate::utilities::storage::{create_temp_datadir, TempDataDir};
    use crate::node::{BlockInfo, TxAcceptance};
    use anyhow::{anyhow, bail};
    use async_trait::async_trait;
    use minerid_common::miner_info::find_miner_info_ref;

    /// Sim node whose `createminerinfotx` call never reaches the node
    struct UnreachableMinerInfo(SimNode);

    #[async_trait]
    impl NodeRpc for UnreachableMinerInfo {
        fn label(&self) -> &str {
            self.0.label()
        }

        fn p2p_address(&self) -> String {
            self.0.p2p_address()
        }

        async fn get_best_block_hash(&self) -> anyhow::Result<Hash> {
            self.0.get_best_block_hash().await
        }

        async fn get_block_count(&self) -> anyhow::Result<u64> {
            self.0.get_block_count().await
        }

        async fn get_block(&self, hash: &Hash) -> anyhow::Result<BlockInfo> {
            self.0.get_block(hash).await
        }

        async fn get_block_hash(&self, height: u64) -> anyhow::Result<Hash> {
            self.0.get_block_hash(height).await
        }

        async fn get_raw_transaction(&self, txid: &Hash) -> anyhow::Result<Transaction> {
            self.0.get_raw_transaction(txid).await
        }

        async fn create_miner_info_tx(&self, _script: &Script) -> anyhow::Result<Hash> {
            Err(anyhow!(
                "node0: createminerinfotx request failed: error sending request: connection refused"
            ))
        }

        async fn send_raw_transaction(&self, tx: &Transaction) -> anyhow::Result<TxAcceptance> {
            self.0.send_raw_transaction(tx).await
        }

        async fn submit_block(&self, block: &Block) -> anyhow::Result<BlockAcceptance> {
            self.0.submit_block(block).await
        }

        async fn get_raw_mempool(&self) -> anyhow::Result<Vec<Hash>> {
            self.0.get_raw_mempool().await
        }

        async fn generate(&self, blocks: u64) -> anyhow::Result<Vec<Hash>> {
            self.0.generate(blocks).await
        }

        async fn invalidate_block(&self, _hash: &Hash) -> anyhow::Result<()> {
            bail!("not supported")
        }

        async fn add_peer(&self, _address: &str) -> anyhow::Result<()> {
            bail!("not supported")
        }

        async fn disconnect_peer(&self, _address: &str) -> anyhow::Result<()> {
            bail!("not supported")
        }

        async fn get_peers(&self) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        _root: TempDataDir,
        node: SimNode,
        keys: ParticipantKeySet,
        cycle: IdentityTransactionCycle,
    }

    async fn funded_node() -> Fixture {
        let root = create_temp_datadir().unwrap();
        let network = SimNetwork::builder()
            .with_nodes(1)
            .with_config(SimConfig {
                coinbase_maturity: 1,
                ..SimConfig::default()
            })
            .with_datadir_root(root.path())
            .build()
            .unwrap();
        let node = network.node(0).unwrap();
        let keys = KeyMaterialProvisioner::new(Arc::new(SeedSequence::new(2)))
            .provision(0)
            .unwrap();

        let funding = FundingLifecycleManager::new(FundingWriteMode::Upsert);
        let source = funding.mine_funding_source(&node, "source").await.unwrap();
        node.generate(1).await.unwrap();
        funding
            .fund(&node, &keys, node.datadir(), &source)
            .await
            .unwrap();

        let cycle = IdentityTransactionCycle::new(
            Arc::new(PausedClock::new()),
            WaitPolicy::default(),
            "127.0.0.1",
            8333,
        );
        Fixture {
            _root: root,
            node,
            keys,
            cycle,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mining_cycle_moves_tx_into_block() {
        let f = funded_node().await;
        let height = f.node.get_block_count().await.unwrap() + 1;

        let report = f
            .cycle
            .run_cycle(&f.node, &f.keys, height, "miner name 0", true)
            .await
            .unwrap();
        assert_eq!(
            report.states,
            vec![
                CycleState::Built,
                CycleState::Broadcast,
                CycleState::MempoolPending,
                CycleState::Mined
            ]
        );
        assert_eq!(f.node.get_block_count().await.unwrap(), height);
        assert!(!f.node.get_raw_mempool().await.unwrap().contains(&report.txid));

        // funding split rides along as an unconfirmed ancestor
        let block = f.node.get_block(&report.mined_block().unwrap()).await.unwrap();
        assert_eq!(block.txids.len(), 3);
        assert_eq!(block.txids[2], report.txid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_cycles_chain_and_mine_together() {
        let f = funded_node().await;
        let height = f.node.get_block_count().await.unwrap() + 1;

        let first = f
            .cycle
            .run_cycle(&f.node, &f.keys, height, "miner name 0", false)
            .await
            .unwrap();
        assert_eq!(first.outcome, CycleOutcome::LeftPending);
        assert_eq!(first.final_state(), Some(CycleState::LeftPending));
        assert_eq!(f.node.get_block_count().await.unwrap(), height - 1);

        let second = f
            .cycle
            .run_cycle(&f.node, &f.keys, height, "miner name 0", true)
            .await
            .unwrap();
        let hash = second.mined_block().unwrap();
        let info = f.node.get_block(&hash).await.unwrap();
        let first_pos = info.txids.iter().position(|id| *id == first.txid).unwrap();
        let second_pos = info.txids.iter().position(|id| *id == second.txid).unwrap();
        assert!(first_pos < second_pos);
        assert!(f.node.get_raw_mempool().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_height_is_refused() {
        let f = funded_node().await;
        let tip = f.node.get_block_count().await.unwrap();
        let err = f
            .cycle
            .run_cycle(&f.node, &f.keys, tip, "miner name 0", true)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::StaleHeight { .. }));
        assert_eq!(err.kind(), ErrorKind::Harness);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfunded_node_refuses_miner_info_tx() {
        let root = create_temp_datadir().unwrap();
        let network = SimNetwork::builder()
            .with_nodes(1)
            .with_datadir_root(root.path())
            .build()
            .unwrap();
        let node = network.node(0).unwrap();
        let keys = KeyMaterialProvisioner::new(Arc::new(SeedSequence::new(2)))
            .provision(0)
            .unwrap();
        let cycle = IdentityTransactionCycle::new(
            Arc::new(PausedClock::new()),
            WaitPolicy::default(),
            "127.0.0.1",
            8333,
        );

        let err = cycle
            .run_cycle(&node, &keys, 1, "miner name 0", true)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::MinerInfoRejected { height: 1, .. }));
        assert_eq!(err.kind(), ErrorKind::Rejection);
        assert!(err.to_string().contains("funding is not configured"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_node_is_a_harness_error() {
        let f = funded_node().await;
        let height = f.node.get_block_count().await.unwrap() + 1;
        let node = UnreachableMinerInfo(f.node.clone());

        let err = f
            .cycle
            .run_cycle(&node, &f.keys, height, "miner name 0", true)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Rpc { .. }));
        assert_eq!(err.kind(), ErrorKind::Harness);
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_candidate_on_moved_tip_is_stale() {
        let f = funded_node().await;
        let tip = f.node.get_tip().await.unwrap();
        let candidate = CandidateBlock::build(&tip, b"late", vec![], vec![]);
        f.node.generate(1).await.unwrap();

        let err = candidate.submit(&f.node).await.unwrap_err();
        assert!(err.is_expected_rejection());
        assert_eq!(err.kind(), ErrorKind::Rejection);
    }

    #[tokio::test(start_paused = true)]
    async fn test_candidate_references_identity_tx() {
        let f = funded_node().await;
        let height = f.node.get_block_count().await.unwrap() + 1;
        let report = f
            .cycle
            .run_cycle(&f.node, &f.keys, height, "miner name 0", true)
            .await
            .unwrap();

        let info = f.node.get_block(&report.mined_block().unwrap()).await.unwrap();
        let mut transactions = Vec::new();
        for txid in &info.txids {
            transactions.push(f.node.get_raw_transaction(txid).await.unwrap());
        }
        let mut block = Block::new(info.prev_hash.unwrap(), info.time, transactions);
        block.solve();
        assert_eq!(block.hash(), info.hash);

        let found = find_miner_info_ref(&block).unwrap().unwrap();
        assert_eq!(found.miner_info_tx, report.txid);
        assert_eq!(found.height, height);
    }
}
