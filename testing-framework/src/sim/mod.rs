//! In-process simulated node network
//!
//! Implements the full [`NodeRpc`](crate::node::NodeRpc) contract without
//! spawning processes, so the orchestration engine can be exercised
//! deterministically on paused tokio time.
//!
//! # Architecture
//!
//! ```text
//! SimNetwork (Arc<Mutex<NetworkState>>)
//!   ├── node0: ChainState + Mempool
//!   ├── node1: ChainState + Mempool
//!   ├── links {(0, 1)}
//!   └── in-flight envelopes (block / tx, deliver_at)
//! ```
//!
//! Relay is lazy: envelopes whose delivery instant has passed are
//! delivered at the start of every RPC call on any node.

mod chain;
mod mempool;
mod network;
mod node;

pub use chain::{BlockEntry, ChainState, Coin, TipChange, UtxoSet};
pub use mempool::{Mempool, MempoolEntry};
pub use network::{SimNetwork, SimNetworkBuilder};
pub use node::SimNode;

use minerid_common::config::{COINBASE_MATURITY, MINER_INFO_TX_FEE};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

/// Behaviour switches that make the simulated nodes misbehave on purpose
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimFaults {
    /// Transactions stay in the mempool after the block containing them
    /// is connected
    pub keep_mined_in_mempool: bool,
    /// Blocks relayed between peers are lost in transit
    pub drop_relayed_blocks: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub propagation_delay_ms: u64,
    pub coinbase_maturity: u64,
    /// Fee paid by transactions built by `createminerinfotx`
    pub miner_info_fee: u64,
    pub faults: SimFaults,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            propagation_delay_ms: 20,
            coinbase_maturity: COINBASE_MATURITY,
            miner_info_fee: MINER_INFO_TX_FEE,
            faults: SimFaults::default(),
        }
    }
}

impl SimConfig {
    pub fn propagation_delay(&self) -> Duration {
        Duration::from_millis(self.propagation_delay_ms)
    }
}
