// Shared state of the simulated network: nodes, peer links and the
// envelopes travelling between them.

use super::chain::{AcceptOutcome, ChainState, TipChange};
use super::mempool::Mempool;
use super::node::SimNode;
use super::{SimConfig, SimFaults};
use crate::orchestrator::{Clock, SystemClock};
use anyhow::{Context, Result};
use log::{debug, info, trace};
use minerid_common::{
    block::Block,
    config::BLOCK_SUBSIDY,
    crypto::Hash,
    script::Script,
    transaction::{OutPoint, Transaction, TxOut},
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;

/// Why a node did not store a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum BlockRefusal {
    /// Already known; reported as `duplicate`, like `submitblock`
    Duplicate,
    Invalid(String),
}

impl Display for BlockRefusal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockRefusal::Duplicate => write!(f, "duplicate"),
            BlockRefusal::Invalid(reason) => write!(f, "{}", reason),
        }
    }
}

/// First P2P port handed to simulated nodes
const BASE_P2P_PORT: u16 = 18444;

#[derive(Clone)]
pub(super) enum Payload {
    Block(Arc<Block>),
    Transaction(Transaction),
}

struct Envelope {
    id: u64,
    from: usize,
    to: usize,
    deliver_at: Instant,
    payload: Payload,
}

pub(super) struct NodeState {
    pub label: String,
    pub address: String,
    pub datadir: PathBuf,
    pub chain: ChainState,
    pub mempool: Mempool,
    generated: u64,
}

impl NodeState {
    fn new(index: usize, datadir: PathBuf, config: &SimConfig) -> Self {
        Self {
            label: format!("node{}", index),
            address: format!("127.0.0.1:{}", BASE_P2P_PORT + index as u16),
            datadir,
            chain: ChainState::new(Block::genesis(), config.coinbase_maturity),
            mempool: Mempool::new(),
            generated: 0,
        }
    }

    pub fn accept_transaction(&mut self, tx: Transaction) -> Result<Hash, String> {
        let next_height = self.chain.height() + 1;
        let maturity = self.chain.maturity();
        self.mempool
            .admit(tx, self.chain.tip_utxos(), next_height, maturity)
    }

    /// Store `block` and follow any tip change. Returns the blocks newly
    /// stored (the block itself plus orphans it unlocked).
    fn accept_block(
        &mut self,
        block: Block,
        allow_orphan: bool,
        faults: &SimFaults,
    ) -> Result<Vec<Arc<Block>>, BlockRefusal> {
        match self
            .chain
            .accept_block(block, allow_orphan)
            .map_err(BlockRefusal::Invalid)?
        {
            AcceptOutcome::Stored { stored, tip_change } => {
                if let Some(change) = tip_change {
                    self.apply_tip_change(change, faults);
                }
                Ok(stored)
            }
            AcceptOutcome::Duplicate => Err(BlockRefusal::Duplicate),
            AcceptOutcome::Orphan => Ok(Vec::new()),
        }
    }

    fn invalidate(&mut self, hash: &Hash, faults: &SimFaults) -> Result<(), String> {
        if let Some(change) = self.chain.invalidate(hash)? {
            self.apply_tip_change(change, faults);
        }
        Ok(())
    }

    // Rebuild the mempool against the new tip: transactions of disconnected
    // blocks first, then the previous pool.
    fn apply_tip_change(&mut self, change: TipChange, faults: &SimFaults) {
        let tip = self.chain.tip();
        if change.is_reorg() {
            info!(
                "{} reorganized: {} blocks disconnected, {} connected, tip {} at height {}",
                self.label,
                change.disconnected.len(),
                change.connected.len(),
                tip.hash,
                tip.height
            );
        } else if log::log_enabled!(log::Level::Debug) {
            debug!("{} new tip {} at height {}", self.label, tip.hash, tip.height);
        }

        let mut candidates: Vec<Transaction> = change
            .disconnected
            .iter()
            .flat_map(|block| block.transactions.iter().skip(1).cloned())
            .collect();
        candidates.extend(self.mempool.drain());

        let next_height = self.chain.height() + 1;
        let maturity = self.chain.maturity();
        let dropped =
            self.mempool
                .readmit(candidates, self.chain.tip_utxos(), next_height, maturity);
        if dropped > 0 {
            trace!("{} dropped {} transactions after tip change", self.label, dropped);
        }

        if faults.keep_mined_in_mempool {
            for block in &change.connected {
                for tx in block.transactions.iter().skip(1) {
                    self.mempool.insert_unchecked(tx.clone());
                }
            }
        }
    }

    /// Solved block on the current tip spending the whole mempool
    fn mine_block(&mut self) -> Block {
        let tip = self.chain.tip();
        let height = tip.height + 1;
        let tag = format!("{}/{}", self.label, self.generated);
        self.generated += 1;

        let coinbase = Transaction::coinbase(
            height,
            tag.as_bytes(),
            vec![TxOut::new(
                BLOCK_SUBSIDY + self.mempool.total_fees(),
                Script::anyone_can_spend(),
            )],
        );
        let mut transactions = vec![coinbase];
        transactions.extend(self.mempool.entries().map(|entry| entry.tx.clone()));

        let mut block = Block::new(tip.hash, tip.block.header.time + 1, transactions);
        block.solve();
        block
    }

    /// Outpoint -> spending txid over the active chain and the mempool
    pub fn spends(&self) -> HashMap<OutPoint, Hash> {
        let mut spends = self.chain.spends();
        for entry in self.mempool.entries() {
            let txid = entry.tx.txid();
            for input in &entry.tx.inputs {
                spends.insert(input.previous_output, txid);
            }
        }
        spends
    }

    /// Unspent output at the tip or created by a pool transaction
    pub fn find_output(&self, outpoint: &OutPoint) -> Option<TxOut> {
        if let Some(coin) = self.chain.tip_utxos().get(outpoint) {
            return Some(coin.output.clone());
        }
        if self.mempool.spender_of(outpoint).is_some() {
            return None;
        }
        self.mempool.output(outpoint).cloned()
    }

    pub fn find_transaction(&self, txid: &Hash) -> Option<Transaction> {
        self.mempool
            .get(txid)
            .or_else(|| self.chain.find_transaction(txid))
            .cloned()
    }
}

pub(super) struct NetworkState {
    pub nodes: Vec<NodeState>,
    pub config: SimConfig,
    links: BTreeSet<(usize, usize)>,
    in_flight: Vec<Envelope>,
    next_envelope: u64,
}

fn link_key(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

impl NetworkState {
    pub fn is_linked(&self, a: usize, b: usize) -> bool {
        self.links.contains(&link_key(a, b))
    }

    pub fn peers_of(&self, index: usize) -> Vec<usize> {
        self.links
            .iter()
            .filter_map(|&(a, b)| match index {
                i if i == a => Some(b),
                i if i == b => Some(a),
                _ => None,
            })
            .collect()
    }

    pub fn index_of(&self, address: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.address == address)
    }

    /// Link `a` and `b` and let each side announce its blocks and pool
    pub fn connect(&mut self, a: usize, b: usize, now: Instant) {
        if a == b || !self.links.insert(link_key(a, b)) {
            return;
        }
        debug!("{} <-> {} connected", self.nodes[a].label, self.nodes[b].label);
        for (from, to) in [(a, b), (b, a)] {
            let blocks = self.nodes[from].chain.known_blocks();
            let txs: Vec<Transaction> = self.nodes[from]
                .mempool
                .entries()
                .map(|entry| entry.tx.clone())
                .collect();
            for block in blocks {
                self.send(from, to, Payload::Block(block), now);
            }
            for tx in txs {
                self.send(from, to, Payload::Transaction(tx), now);
            }
        }
    }

    /// Cut the link; envelopes still travelling on it are lost
    pub fn disconnect(&mut self, a: usize, b: usize) -> bool {
        if !self.links.remove(&link_key(a, b)) {
            return false;
        }
        let before = self.in_flight.len();
        self.in_flight
            .retain(|envelope| link_key(envelope.from, envelope.to) != link_key(a, b));
        debug!(
            "{} <-> {} disconnected, {} envelopes dropped",
            self.nodes[a].label,
            self.nodes[b].label,
            before - self.in_flight.len()
        );
        true
    }

    fn send(&mut self, from: usize, to: usize, payload: Payload, now: Instant) {
        self.in_flight.push(Envelope {
            id: self.next_envelope,
            from,
            to,
            deliver_at: now + self.config.propagation_delay(),
            payload,
        });
        self.next_envelope += 1;
    }

    /// Send `payload` from `from` to every linked peer except `skip`
    pub fn relay(&mut self, from: usize, payload: Payload, now: Instant, skip: Option<usize>) {
        for peer in self.peers_of(from) {
            if Some(peer) != skip {
                self.send(from, peer, payload.clone(), now);
            }
        }
    }

    /// Deliver every envelope due at `now`, including relays they trigger
    pub fn deliver_due(&mut self, now: Instant) {
        loop {
            let (mut due, pending): (Vec<Envelope>, Vec<Envelope>) =
                std::mem::take(&mut self.in_flight)
                    .into_iter()
                    .partition(|envelope| envelope.deliver_at <= now);
            self.in_flight = pending;
            if due.is_empty() {
                break;
            }
            due.sort_by_key(|envelope| (envelope.deliver_at, envelope.id));
            for envelope in due {
                self.deliver(envelope, now);
            }
        }
    }

    fn deliver(&mut self, envelope: Envelope, now: Instant) {
        let Envelope { from, to, payload, .. } = envelope;
        if !self.is_linked(from, to) {
            return;
        }
        match payload {
            Payload::Block(block) => {
                if self.config.faults.drop_relayed_blocks {
                    trace!("dropping relayed block {} to {}", block.hash(), self.nodes[to].label);
                    return;
                }
                let hash = block.hash();
                let faults = self.config.faults.clone();
                match self.nodes[to].accept_block((*block).clone(), true, &faults) {
                    Ok(stored) => {
                        for block in stored {
                            self.relay(to, Payload::Block(block), now, Some(from));
                        }
                    }
                    Err(BlockRefusal::Duplicate) => {}
                    Err(BlockRefusal::Invalid(reason)) => debug!(
                        "{} ignored block {} from {}: {}",
                        self.nodes[to].label, hash, self.nodes[from].label, reason
                    ),
                }
            }
            Payload::Transaction(tx) => {
                match self.nodes[to].accept_transaction(tx.clone()) {
                    Ok(_) => self.relay(to, Payload::Transaction(tx), now, Some(from)),
                    Err(reason) => trace!(
                        "{} ignored tx {} from {}: {}",
                        self.nodes[to].label,
                        tx.txid(),
                        self.nodes[from].label,
                        reason
                    ),
                }
            }
        }
    }

    /// Store a block handed to `index` over RPC and relay what got stored
    pub fn submit_block(&mut self, index: usize, block: Block, now: Instant) -> Result<(), String> {
        let faults = self.config.faults.clone();
        let stored = self.nodes[index]
            .accept_block(block, false, &faults)
            .map_err(|refusal| refusal.to_string())?;
        for block in stored {
            self.relay(index, Payload::Block(block), now, None);
        }
        Ok(())
    }

    pub fn submit_transaction(
        &mut self,
        index: usize,
        tx: Transaction,
        now: Instant,
    ) -> Result<Hash, String> {
        let txid = self.nodes[index].accept_transaction(tx.clone())?;
        self.relay(index, Payload::Transaction(tx), now, None);
        Ok(txid)
    }

    pub fn generate(&mut self, index: usize, now: Instant) -> Result<Hash, String> {
        let block = self.nodes[index].mine_block();
        let hash = block.hash();
        self.submit_block(index, block, now)?;
        Ok(hash)
    }

    pub fn invalidate(&mut self, index: usize, hash: &Hash) -> Result<(), String> {
        let faults = self.config.faults.clone();
        self.nodes[index].invalidate(hash, &faults)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Handle to the simulated network; clones share the same state
#[derive(Clone)]
pub struct SimNetwork {
    state: Arc<Mutex<NetworkState>>,
    clock: Arc<dyn Clock>,
}

impl SimNetwork {
    pub fn builder() -> SimNetworkBuilder {
        SimNetworkBuilder::new()
    }

    /// Run `f` on the network state after delivering due envelopes
    pub(super) fn with_state<R>(&self, f: impl FnOnce(&mut NetworkState, Instant) -> R) -> R {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.deliver_due(now);
        f(&mut state, now)
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// RPC handle for node `index`
    pub fn node(&self, index: usize) -> Option<SimNode> {
        let state = self.state.lock();
        let node = state.nodes.get(index)?;
        Some(SimNode::new(
            self.clone(),
            index,
            node.label.clone(),
            node.address.clone(),
            node.datadir.clone(),
        ))
    }

    pub fn nodes(&self) -> Vec<SimNode> {
        (0..self.node_count()).filter_map(|i| self.node(i)).collect()
    }

    /// Envelopes not yet delivered
    pub fn in_flight(&self) -> usize {
        self.with_state(|state, _| state.in_flight())
    }
}

/// Builder for [`SimNetwork`]
///
/// Nodes `i` and `i + 1` start linked, all at the shared genesis block.
pub struct SimNetworkBuilder {
    node_count: usize,
    config: SimConfig,
    clock: Option<Arc<dyn Clock>>,
    datadir_root: Option<PathBuf>,
    link_initial: bool,
}

impl SimNetworkBuilder {
    pub fn new() -> Self {
        Self {
            node_count: 2,
            config: SimConfig::default(),
            clock: None,
            datadir_root: None,
            link_initial: true,
        }
    }

    pub fn with_nodes(mut self, count: usize) -> Self {
        self.node_count = count;
        self
    }

    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Node `i` keeps its files under `<root>/node<i>`
    pub fn with_datadir_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.datadir_root = Some(root.into());
        self
    }

    /// Start with no links at all
    pub fn unlinked(mut self) -> Self {
        self.link_initial = false;
        self
    }

    pub fn build(self) -> Result<SimNetwork> {
        let root = self
            .datadir_root
            .context("simulated network needs a datadir root")?;
        if self.node_count == 0 {
            anyhow::bail!("simulated network needs at least one node");
        }

        let mut nodes = Vec::with_capacity(self.node_count);
        for index in 0..self.node_count {
            let datadir = root.join(format!("node{}", index));
            std::fs::create_dir_all(&datadir)
                .with_context(|| format!("Failed to create {}", datadir.display()))?;
            nodes.push(NodeState::new(index, datadir, &self.config));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let mut state = NetworkState {
            nodes,
            config: self.config,
            links: BTreeSet::new(),
            in_flight: Vec::new(),
            next_envelope: 0,
        };
        if self.link_initial {
            let now = clock.now();
            for index in 1..state.nodes.len() {
                state.connect(index - 1, index, now);
            }
        }

        Ok(SimNetwork {
            state: Arc::new(Mutex::new(state)),
            clock,
        })
    }
}

impl Default for SimNetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}
