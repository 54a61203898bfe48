//! Two-participant network topology control.
//!
//! `ChainTopologyController` connects and disconnects participant nodes,
//! runs synchronisation barriers over them, and forces manual rollbacks by
//! invalidating a block on every node. Each operation is an explicit barrier:
//! it only returns once the observable state it promises holds.
//!
//! # Example
//! ```ignore
//! let mut topology = ChainTopologyController::new(clock, policy);
//!
//! topology.partition(&*a, &*b).await?;
//! // mine independently on each side...
//! topology.join(&*a, &*b).await?;
//! let tip = topology.await_convergence(&nodes).await?;
//! ```

use crate::error::{HarnessError, HarnessResult};
use crate::node::{
    wait_all_mempools_equal, wait_all_tips_equal, wait_for_peer_link, ChainView, NodeRpc,
    TipInfo, WaitPolicy,
};
use crate::orchestrator::Clock;
use log::{debug, error, info};
use minerid_common::crypto::Hash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Observed peer links between participant nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub node_count: usize,
    /// Participant index -> indexes of participants it lists as peers
    pub connections: BTreeMap<usize, Vec<usize>>,
    /// Unordered pairs with no link in either direction
    pub partitions: Vec<(usize, usize)>,
}

pub struct ChainTopologyController {
    clock: Arc<dyn Clock>,
    policy: WaitPolicy,
    /// Block invalidated by the last rollback, until a convergence barrier
    /// has passed
    pending_rollback: Option<Hash>,
}

impl ChainTopologyController {
    pub fn new(clock: Arc<dyn Clock>, policy: WaitPolicy) -> Self {
        Self {
            clock,
            policy,
            pending_rollback: None,
        }
    }

    async fn lists(node: &dyn NodeRpc, peer: &str) -> HarnessResult<bool> {
        let peers = node
            .get_peers()
            .await
            .map_err(|e| HarnessError::rpc(node.label(), e))?;
        Ok(peers.iter().any(|p| p == peer))
    }

    /// Connect `a` to `b`. Already connected peers are left alone.
    pub async fn join(&self, a: &dyn NodeRpc, b: &dyn NodeRpc) -> HarnessResult<()> {
        let b_addr = b.p2p_address();
        if Self::lists(a, &b_addr).await? {
            debug!("{} already connected to {}", a.label(), b.label());
            return Ok(());
        }

        a.add_peer(&b_addr)
            .await
            .map_err(|e| HarnessError::rpc(a.label(), e))?;
        wait_for_peer_link(self.clock.as_ref(), &self.policy, a, &b_addr, true)
            .await
            .map_err(|source| HarnessError::TopologyTimeout { source })?;
        info!("joined {} and {}", a.label(), b.label());
        Ok(())
    }

    /// Cut every link between `a` and `b`. Unlinked peers are left alone.
    pub async fn partition(&self, a: &dyn NodeRpc, b: &dyn NodeRpc) -> HarnessResult<()> {
        let a_addr = a.p2p_address();
        let b_addr = b.p2p_address();
        let a_lists_b = Self::lists(a, &b_addr).await?;
        let b_lists_a = Self::lists(b, &a_addr).await?;
        if !a_lists_b && !b_lists_a {
            debug!("{} and {} already partitioned", a.label(), b.label());
            return Ok(());
        }

        if a_lists_b {
            a.disconnect_peer(&b_addr)
                .await
                .map_err(|e| HarnessError::rpc(a.label(), e))?;
        }
        // the link may already be gone from b's side after a's disconnect
        if b_lists_a && Self::lists(b, &a_addr).await? {
            b.disconnect_peer(&a_addr)
                .await
                .map_err(|e| HarnessError::rpc(b.label(), e))?;
        }

        for (node, peer) in [(a, &b_addr), (b, &a_addr)] {
            wait_for_peer_link(self.clock.as_ref(), &self.policy, node, peer, false)
                .await
                .map_err(|source| HarnessError::TopologyTimeout { source })?;
        }
        info!("partitioned {} from {}", a.label(), b.label());
        Ok(())
    }

    /// Block until every node reports the same tip. Clears a pending
    /// rollback.
    pub async fn await_convergence(&mut self, nodes: &[Arc<dyn NodeRpc>]) -> HarnessResult<TipInfo> {
        match wait_all_tips_equal(self.clock.as_ref(), &self.policy, nodes).await {
            Ok(tip) => {
                if let Some(hash) = self.pending_rollback.take() {
                    debug!("rollback of {} settled", hash);
                }
                info!("tips converged on {} at height {}", tip.hash, tip.height);
                Ok(tip)
            }
            Err(source) => {
                error!("tips did not converge: {}", source);
                Err(HarnessError::ConvergenceTimeout { source })
            }
        }
    }

    /// Block until every node holds the same mempool
    pub async fn await_mempool_convergence(
        &self,
        nodes: &[Arc<dyn NodeRpc>],
    ) -> HarnessResult<Vec<ChainView>> {
        let views = wait_all_mempools_equal(self.clock.as_ref(), &self.policy, nodes)
            .await
            .map_err(|source| {
                error!("mempools did not converge: {}", source);
                HarnessError::ConvergenceTimeout { source }
            })?;
        debug!(
            "mempools converged at {} transaction(s)",
            views.first().map(|v| v.mempool.len()).unwrap_or(0)
        );
        Ok(views)
    }

    /// Tips, then mempools
    pub async fn sync(&mut self, nodes: &[Arc<dyn NodeRpc>]) -> HarnessResult<Vec<ChainView>> {
        self.await_convergence(nodes).await?;
        self.await_mempool_convergence(nodes).await
    }

    /// Invalidate `hash` on every node, forcing each to re-run fork choice.
    /// Mining is refused by [`require_settled`](Self::require_settled) until
    /// a convergence barrier passes.
    pub async fn rollback(&mut self, nodes: &[Arc<dyn NodeRpc>], hash: &Hash) -> HarnessResult<()> {
        for node in nodes {
            node.invalidate_block(hash)
                .await
                .map_err(|e| HarnessError::rpc(node.label(), e))?;
            debug!("{} invalidated {}", node.label(), hash);
        }
        self.pending_rollback = Some(*hash);
        info!("rolled back {} on {} node(s)", hash, nodes.len());
        Ok(())
    }

    pub fn pending_rollback(&self) -> Option<&Hash> {
        self.pending_rollback.as_ref()
    }

    pub fn require_settled(&self) -> HarnessResult<()> {
        match &self.pending_rollback {
            Some(hash) => Err(HarnessError::Scenario(format!(
                "rollback of {} must be followed by a convergence barrier before mining",
                hash
            ))),
            None => Ok(()),
        }
    }

    /// Current peer links between `nodes`, by index
    pub async fn snapshot(&self, nodes: &[Arc<dyn NodeRpc>]) -> HarnessResult<TopologySnapshot> {
        let addresses: Vec<String> = nodes.iter().map(|n| n.p2p_address()).collect();
        let mut connections = BTreeMap::new();
        for (index, node) in nodes.iter().enumerate() {
            let peers = node
                .get_peers()
                .await
                .map_err(|e| HarnessError::rpc(node.label(), e))?;
            let linked: Vec<usize> = addresses
                .iter()
                .enumerate()
                .filter(|(other, addr)| *other != index && peers.contains(*addr))
                .map(|(other, _)| other)
                .collect();
            connections.insert(index, linked);
        }

        let mut partitions = Vec::new();
        for a in 0..nodes.len() {
            for b in a + 1..nodes.len() {
                let ab = connections.get(&a).is_some_and(|p: &Vec<usize>| p.contains(&b));
                let ba = connections.get(&b).is_some_and(|p: &Vec<usize>| p.contains(&a));
                if !ab && !ba {
                    partitions.push((a, b));
                }
            }
        }

        Ok(TopologySnapshot {
            node_count: nodes.len(),
            connections,
            partitions,
        })
    }
}
