// Integration test for barrier primitives
// This tests the waiters in isolation from the simulated network

use anyhow::{bail, Result};
use async_trait::async_trait;
use minerid_common::{block::Block, crypto::Hash, script::Script, transaction::Transaction};
use minerid_testing_framework::node::{
    wait_all_tips_equal, wait_for_height, wait_for_peer_link, BlockAcceptance, BlockInfo,
    NodeRpc, TxAcceptance, WaitError, WaitPolicy,
};
use minerid_testing_framework::orchestrator::PausedClock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

// Mock node exposing only height, tip and peers
struct TestNode {
    label: String,
    height: Arc<Mutex<u64>>,
    tip: Arc<Mutex<Hash>>,
    peers: Arc<Mutex<Vec<String>>>,
}

impl TestNode {
    fn new(label: &str, height: u64, tip: Hash) -> Self {
        Self {
            label: label.to_string(),
            height: Arc::new(Mutex::new(height)),
            tip: Arc::new(Mutex::new(tip)),
            peers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn set_height(&self, h: u64) {
        *self.height.lock().await = h;
    }
}

#[async_trait]
impl NodeRpc for TestNode {
    fn label(&self) -> &str {
        &self.label
    }

    fn p2p_address(&self) -> String {
        format!("{}:8333", self.label)
    }

    async fn get_best_block_hash(&self) -> Result<Hash> {
        Ok(*self.tip.lock().await)
    }

    async fn get_block_count(&self) -> Result<u64> {
        Ok(*self.height.lock().await)
    }

    async fn get_block(&self, hash: &Hash) -> Result<BlockInfo> {
        Ok(BlockInfo {
            hash: *hash,
            height: *self.height.lock().await,
            time: 0,
            prev_hash: None,
            txids: Vec::new(),
        })
    }

    async fn get_block_hash(&self, _height: u64) -> Result<Hash> {
        bail!("not supported")
    }

    async fn get_raw_transaction(&self, _txid: &Hash) -> Result<Transaction> {
        bail!("not supported")
    }

    async fn create_miner_info_tx(&self, _script: &Script) -> Result<Hash> {
        bail!("not supported")
    }

    async fn send_raw_transaction(&self, _tx: &Transaction) -> Result<TxAcceptance> {
        bail!("not supported")
    }

    async fn submit_block(&self, _block: &Block) -> Result<BlockAcceptance> {
        bail!("not supported")
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Hash>> {
        Ok(Vec::new())
    }

    async fn generate(&self, _blocks: u64) -> Result<Vec<Hash>> {
        bail!("not supported")
    }

    async fn invalidate_block(&self, _hash: &Hash) -> Result<()> {
        bail!("not supported")
    }

    async fn add_peer(&self, address: &str) -> Result<()> {
        self.peers.lock().await.push(address.to_string());
        Ok(())
    }

    async fn disconnect_peer(&self, address: &str) -> Result<()> {
        self.peers.lock().await.retain(|p| p != address);
        Ok(())
    }

    async fn get_peers(&self) -> Result<Vec<String>> {
        Ok(self.peers.lock().await.clone())
    }
}

fn policy(timeout: Duration) -> WaitPolicy {
    WaitPolicy {
        timeout,
        ..WaitPolicy::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_height_basic() {
    let clock = PausedClock::new();
    let node = TestNode::new("node0", 100, Hash::zero());

    // Already at height 100, should return immediately
    let reached = wait_for_height(&clock, &policy(Duration::from_secs(1)), &node, 100).await;
    assert_eq!(reached.unwrap(), 100);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_height_with_progression() {
    let clock = PausedClock::new();
    let node = Arc::new(TestNode::new("node0", 50, Hash::zero()));
    let node_clone = node.clone();

    // Advance height in background
    tokio::spawn(async move {
        sleep(Duration::from_millis(200)).await;
        node_clone.set_height(110).await;
    });

    let reached = wait_for_height(&clock, &policy(Duration::from_secs(2)), &*node, 100).await;
    assert_eq!(reached.unwrap(), 110);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_height_times_out_with_last_observation() {
    let clock = PausedClock::new();
    let node = TestNode::new("node0", 50, Hash::zero());

    let err = wait_for_height(&clock, &policy(Duration::from_secs(2)), &node, 100)
        .await
        .unwrap_err();
    match err {
        WaitError::Timeout {
            waited,
            last_observed,
            ..
        } => {
            assert!(waited >= Duration::from_secs(2));
            assert_eq!(last_observed, "height 50");
        }
        other => panic!("unexpected error {}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_wait_all_tips_equal_basic() {
    let clock = PausedClock::new();
    let tip = Hash::new([1u8; 32]);
    let nodes: Vec<Arc<dyn NodeRpc>> = vec![
        Arc::new(TestNode::new("node0", 100, tip)),
        Arc::new(TestNode::new("node1", 100, tip)),
    ];

    let result = wait_all_tips_equal(&clock, &policy(Duration::from_secs(1)), &nodes).await;
    assert_eq!(result.unwrap().hash, tip);
}

#[tokio::test(start_paused = true)]
async fn test_wait_all_tips_equal_reports_both_tips() {
    let clock = PausedClock::new();
    let nodes: Vec<Arc<dyn NodeRpc>> = vec![
        Arc::new(TestNode::new("node0", 100, Hash::new([1u8; 32]))),
        Arc::new(TestNode::new("node1", 101, Hash::new([2u8; 32]))),
    ];

    let err = wait_all_tips_equal(&clock, &policy(Duration::from_secs(1)), &nodes)
        .await
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("node0="));
    assert!(text.contains("@101"));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_peer_link() {
    let clock = PausedClock::new();
    let node = TestNode::new("node0", 0, Hash::zero());
    node.add_peer("node1:8333").await.unwrap();

    let policy = policy(Duration::from_secs(1));
    wait_for_peer_link(&clock, &policy, &node, "node1:8333", true)
        .await
        .unwrap();
    assert!(wait_for_peer_link(&clock, &policy, &node, "node1:8333", false)
        .await
        .is_err());
}
