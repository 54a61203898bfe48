// File: testing-framework/src/node/mod.rs
//
// Node Collaborator Contract
//
// The harness never reaches into a node. Everything it observes or triggers
// goes through `NodeRpc`, which is implemented by the JSON-RPC adapter for
// real nodes and by the in-process simulated network.

/// JSON-RPC adapter for bitcoind-style nodes
pub mod rpc_client;
/// Barrier primitives polling node state
pub mod waiters;

pub use rpc_client::{JsonRpcNode, RpcEndpoint, RpcError};
pub use waiters::{
    wait_all_mempools_equal, wait_all_tips_equal, wait_for_height, wait_for_mempool_tx,
    wait_for_peer_link, wait_until, Probe, WaitError, WaitPolicy,
};

use anyhow::Result;
use async_trait::async_trait;
use minerid_common::{block::Block, crypto::Hash, script::Script, transaction::Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// Outcome of broadcasting a raw transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxAcceptance {
    Accepted(Hash),
    Rejected(String),
}

/// Outcome of submitting a fully formed block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockAcceptance {
    Accepted,
    Rejected(String),
}

/// Summary of a stored block as reported by `getblock`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub hash: Hash,
    pub height: u64,
    pub time: u32,
    #[serde(rename = "previousblockhash", default)]
    pub prev_hash: Option<Hash>,
    #[serde(rename = "tx")]
    pub txids: Vec<Hash>,
}

/// Chain tip as seen by one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipInfo {
    pub hash: Hash,
    pub height: u64,
    pub time: u32,
}

/// Node RPC surface consumed by the harness
///
/// Object safe, so participants hold `Arc<dyn NodeRpc>` regardless of
/// backend. Transport failures surface as `Err`; a node refusing a
/// transaction or block is a normal `Ok(Rejected(..))` answer.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Short human-readable node name used in logs and failure reports
    fn label(&self) -> &str;

    /// Address other nodes use to open a P2P connection to this node
    fn p2p_address(&self) -> String;

    async fn get_best_block_hash(&self) -> Result<Hash>;

    async fn get_block_count(&self) -> Result<u64>;

    async fn get_block(&self, hash: &Hash) -> Result<BlockInfo>;

    /// Best block hash, height and time
    async fn get_tip(&self) -> Result<TipInfo> {
        let hash = self.get_best_block_hash().await?;
        let block = self.get_block(&hash).await?;
        Ok(TipInfo {
            hash,
            height: block.height,
            time: block.time,
        })
    }

    /// Hash of the active-chain block at `height`
    async fn get_block_hash(&self, height: u64) -> Result<Hash>;

    async fn get_raw_transaction(&self, txid: &Hash) -> Result<Transaction>;

    /// Ask the node to build, sign and broadcast a miner-info transaction
    /// carrying `script`, funded from its configured funding lineage
    async fn create_miner_info_tx(&self, script: &Script) -> Result<Hash>;

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<TxAcceptance>;

    async fn submit_block(&self, block: &Block) -> Result<BlockAcceptance>;

    async fn get_raw_mempool(&self) -> Result<Vec<Hash>>;

    /// Mine `blocks` blocks on the current tip
    async fn generate(&self, blocks: u64) -> Result<Vec<Hash>>;

    /// Mark `hash` and its descendants invalid
    async fn invalidate_block(&self, hash: &Hash) -> Result<()>;

    async fn add_peer(&self, address: &str) -> Result<()>;

    async fn disconnect_peer(&self, address: &str) -> Result<()>;

    /// P2P addresses of currently connected peers
    async fn get_peers(&self) -> Result<Vec<String>>;
}

/// Observed (tip hash, tip height, mempool) of one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainView {
    pub label: String,
    pub tip_hash: Hash,
    pub tip_height: u64,
    pub mempool: BTreeSet<Hash>,
}

impl ChainView {
    /// Snapshot `node`. Tip and mempool are read in two calls, so they are
    /// only coherent when the caller has quiesced the node.
    pub async fn capture(node: &dyn NodeRpc) -> Result<Self> {
        let tip = node.get_tip().await?;
        let mempool = node.get_raw_mempool().await?.into_iter().collect();
        Ok(Self {
            label: node.label().to_string(),
            tip_hash: tip.hash,
            tip_height: tip.height,
            mempool,
        })
    }

    pub fn same_tip(&self, other: &ChainView) -> bool {
        self.tip_hash == other.tip_hash && self.tip_height == other.tip_height
    }
}

impl Display for ChainView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: tip {} at height {}, {} mempool tx",
            self.label,
            self.tip_hash,
            self.tip_height,
            self.mempool.len()
        )
    }
}

/// Capture the view of every node, in order
pub async fn capture_views<N: AsRef<dyn NodeRpc>>(nodes: &[N]) -> Result<Vec<ChainView>> {
    let mut views = Vec::with_capacity(nodes.len());
    for node in nodes {
        views.push(ChainView::capture(node.as_ref()).await?);
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_info_parses_getblock_json() {
        let json = serde_json::json!({
            "hash": "00000000000000000000000000000000000000000000000000000000000000aa",
            "height": 7,
            "time": 1296688610,
            "previousblockhash": "00000000000000000000000000000000000000000000000000000000000000bb",
            "tx": ["00000000000000000000000000000000000000000000000000000000000000cc"],
            "confirmations": 1
        });
        let info: BlockInfo = serde_json::from_value(json).unwrap();
        assert_eq!(info.height, 7);
        assert_eq!(info.txids.len(), 1);
        assert!(info.prev_hash.is_some());
        assert_eq!(info.hash.to_string().len(), 64);
    }

    #[test]
    fn test_genesis_block_info_without_parent() {
        let json = serde_json::json!({
            "hash": "00000000000000000000000000000000000000000000000000000000000000aa",
            "height": 0,
            "time": 1296688602,
            "tx": []
        });
        let info: BlockInfo = serde_json::from_value(json).unwrap();
        assert_eq!(info.prev_hash, None);
    }

    #[test]
    fn test_view_display_names_tip() {
        let view = ChainView {
            label: "node0".to_string(),
            tip_hash: Hash::zero(),
            tip_height: 3,
            mempool: BTreeSet::new(),
        };
        let text = view.to_string();
        assert!(text.contains("node0"));
        assert!(text.contains("height 3"));
    }
}
