// Block tree, validation and fork choice of one simulated node.

use log::{debug, trace};
use minerid_common::{
    block::Block,
    config::{BLOCK_SUBSIDY, REGTEST_BITS},
    crypto::Hash,
    miner_info::find_miner_info_ref,
    script::ScriptKind,
    transaction::{verify_input, OutPoint, Transaction, TxOut},
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Unspent output together with where it was created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub output: TxOut,
    pub height: u64,
    pub is_coinbase: bool,
}

pub type UtxoSet = HashMap<OutPoint, Coin>;

/// Add the spendable outputs of `tx` to `utxos`
pub(super) fn add_outputs(utxos: &mut UtxoSet, tx: &Transaction, height: u64) {
    let txid = tx.txid();
    let is_coinbase = tx.is_coinbase();
    for (vout, output) in tx.outputs.iter().enumerate() {
        if matches!(output.script_pubkey.classify(), ScriptKind::NullData) {
            continue;
        }
        utxos.insert(
            OutPoint::new(txid, vout as u32),
            Coin {
                output: output.clone(),
                height,
                is_coinbase,
            },
        );
    }
}

pub struct BlockEntry {
    pub hash: Hash,
    pub block: Arc<Block>,
    pub height: u64,
    /// Order in which this node stored the block
    pub seq: u64,
    /// Set by `invalidateblock` on the block or one of its ancestors
    pub invalidated: bool,
    utxos: Arc<UtxoSet>,
}

impl BlockEntry {
    /// Coins after this block is connected
    pub fn utxos(&self) -> &UtxoSet {
        &self.utxos
    }
}

/// Blocks removed from and added to the active chain, both ascending
#[derive(Debug, Default)]
pub struct TipChange {
    pub disconnected: Vec<Arc<Block>>,
    pub connected: Vec<Arc<Block>>,
}

impl TipChange {
    pub fn is_reorg(&self) -> bool {
        !self.disconnected.is_empty()
    }
}

pub enum AcceptOutcome {
    /// Stored the block and any orphans waiting on it
    Stored {
        stored: Vec<Arc<Block>>,
        tip_change: Option<TipChange>,
    },
    Duplicate,
    /// Parent unknown; kept until the parent arrives
    Orphan,
}

pub struct ChainState {
    entries: HashMap<Hash, BlockEntry>,
    /// Active chain, indexed by height
    active: Vec<Hash>,
    orphans: HashMap<Hash, Vec<Block>>,
    next_seq: u64,
    maturity: u64,
}

impl ChainState {
    pub fn new(genesis: Block, maturity: u64) -> Self {
        let mut utxos = UtxoSet::new();
        if let Some(coinbase) = genesis.coinbase() {
            add_outputs(&mut utxos, coinbase, 0);
        }
        let hash = genesis.hash();
        let mut entries = HashMap::new();
        entries.insert(
            hash,
            BlockEntry {
                hash,
                block: Arc::new(genesis),
                height: 0,
                seq: 0,
                invalidated: false,
                utxos: Arc::new(utxos),
            },
        );
        Self {
            entries,
            active: vec![hash],
            orphans: HashMap::new(),
            next_seq: 1,
            maturity,
        }
    }

    pub fn maturity(&self) -> u64 {
        self.maturity
    }

    pub fn tip(&self) -> &BlockEntry {
        &self.entries[&self.active[self.active.len() - 1]]
    }

    pub fn height(&self) -> u64 {
        self.active.len() as u64 - 1
    }

    pub fn tip_utxos(&self) -> &UtxoSet {
        self.tip().utxos()
    }

    pub fn get(&self, hash: &Hash) -> Option<&BlockEntry> {
        self.entries.get(hash)
    }

    pub fn hash_at(&self, height: u64) -> Option<Hash> {
        self.active.get(height as usize).copied()
    }

    pub fn active_blocks(&self) -> impl Iterator<Item = &Arc<Block>> + '_ {
        self.active.iter().map(|hash| &self.entries[hash].block)
    }

    pub fn find_transaction(&self, txid: &Hash) -> Option<&Transaction> {
        self.active_blocks()
            .flat_map(|block| block.transactions.iter())
            .find(|tx| tx.txid() == *txid)
    }

    /// Outpoint -> spending txid over the active chain
    pub fn spends(&self) -> HashMap<OutPoint, Hash> {
        let mut spends = HashMap::new();
        for block in self.active_blocks() {
            for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                let txid = tx.txid();
                for input in &tx.inputs {
                    spends.insert(input.previous_output, txid);
                }
            }
        }
        spends
    }

    /// Every block not invalidated, parents before children
    pub fn known_blocks(&self) -> Vec<Arc<Block>> {
        let mut entries: Vec<&BlockEntry> = self
            .entries
            .values()
            .filter(|entry| !entry.invalidated && entry.height > 0)
            .collect();
        entries.sort_by_key(|entry| (entry.height, entry.seq));
        entries.into_iter().map(|entry| entry.block.clone()).collect()
    }

    /// Validate and store `block`. With `allow_orphan` a block whose parent
    /// is unknown is parked instead of rejected.
    pub fn accept_block(&mut self, block: Block, allow_orphan: bool) -> Result<AcceptOutcome, String> {
        let hash = block.hash();
        if self.entries.contains_key(&hash) {
            return Ok(AcceptOutcome::Duplicate);
        }
        let prev = block.header.prev_block;
        if !self.entries.contains_key(&prev) {
            if !allow_orphan {
                return Err("prev-blk-not-found".to_string());
            }
            trace!("parking orphan {} waiting for {}", hash, prev);
            let waiting = self.orphans.entry(prev).or_default();
            if !waiting.iter().any(|b| b.hash() == hash) {
                waiting.push(block);
            }
            return Ok(AcceptOutcome::Orphan);
        }

        let old_active = self.active.clone();
        let mut stored = vec![self.store(block)?];

        let mut parents = vec![hash];
        while let Some(parent) = parents.pop() {
            let Some(children) = self.orphans.remove(&parent) else {
                continue;
            };
            for child in children {
                let child_hash = child.hash();
                if self.entries.contains_key(&child_hash) {
                    continue;
                }
                match self.store(child) {
                    Ok(block) => {
                        stored.push(block);
                        parents.push(child_hash);
                    }
                    Err(reason) => debug!("dropping orphan {}: {}", child_hash, reason),
                }
            }
        }

        let tip_change = self.select_tip(&old_active);
        Ok(AcceptOutcome::Stored { stored, tip_change })
    }

    // Parent must be known
    fn store(&mut self, block: Block) -> Result<Arc<Block>, String> {
        let parent = &self.entries[&block.header.prev_block];
        if parent.invalidated {
            return Err("bad-prevblk".to_string());
        }
        let height = parent.height + 1;
        let utxos = validate_block(&block, parent, height, self.maturity)?;

        let hash = block.hash();
        let block = Arc::new(block);
        self.entries.insert(
            hash,
            BlockEntry {
                hash,
                block: block.clone(),
                height,
                seq: self.next_seq,
                invalidated: false,
                utxos: Arc::new(utxos),
            },
        );
        self.next_seq += 1;
        Ok(block)
    }

    /// Mark `hash` and every descendant invalid, then re-select the tip
    pub fn invalidate(&mut self, hash: &Hash) -> Result<Option<TipChange>, String> {
        let Some(target) = self.entries.get(hash) else {
            return Err("Block not found".to_string());
        };
        if target.height == 0 {
            return Err("cannot invalidate the genesis block".to_string());
        }
        let target_height = target.height;

        let doomed: Vec<Hash> = self
            .entries
            .values()
            .filter(|entry| entry.height >= target_height)
            .filter(|entry| self.ancestor_at(&entry.hash, target_height) == Some(*hash))
            .map(|entry| entry.hash)
            .collect();
        debug!("invalidating {} and {} descendants", hash, doomed.len() - 1);
        for doomed_hash in &doomed {
            if let Some(entry) = self.entries.get_mut(doomed_hash) {
                entry.invalidated = true;
            }
        }

        let old_active = self.active.clone();
        Ok(self.select_tip(&old_active))
    }

    fn ancestor_at(&self, hash: &Hash, height: u64) -> Option<Hash> {
        let mut entry = self.entries.get(hash)?;
        while entry.height > height {
            entry = self.entries.get(&entry.block.header.prev_block)?;
        }
        (entry.height == height).then_some(entry.hash)
    }

    /// Greatest height wins. The current tip is kept on a tie, otherwise the
    /// earliest stored block of the greatest height is chosen.
    fn select_tip(&mut self, old_active: &[Hash]) -> Option<TipChange> {
        let current = self.tip();
        let best = self
            .entries
            .values()
            .filter(|entry| !entry.invalidated)
            .max_by(|a, b| a.height.cmp(&b.height).then(b.seq.cmp(&a.seq)))?;

        let new_tip = if !current.invalidated && current.height >= best.height {
            current.hash
        } else {
            best.hash
        };

        let mut chain = Vec::new();
        let mut cursor = self.entries.get(&new_tip);
        while let Some(entry) = cursor {
            chain.push(entry.hash);
            cursor = if entry.height == 0 {
                None
            } else {
                self.entries.get(&entry.block.header.prev_block)
            };
        }
        chain.reverse();
        self.active = chain;

        let fork = old_active
            .iter()
            .zip(&self.active)
            .take_while(|(old, new)| old == new)
            .count();
        let change = TipChange {
            disconnected: old_active[fork..]
                .iter()
                .map(|hash| self.entries[hash].block.clone())
                .collect(),
            connected: self.active[fork..]
                .iter()
                .map(|hash| self.entries[hash].block.clone())
                .collect(),
        };
        if change.disconnected.is_empty() && change.connected.is_empty() {
            None
        } else {
            Some(change)
        }
    }
}

/// Check `block` at `height` on top of `parent` and return the coins
/// after connecting it. Reasons use the node's reject strings.
fn validate_block(
    block: &Block,
    parent: &BlockEntry,
    height: u64,
    maturity: u64,
) -> Result<UtxoSet, String> {
    if block.header.bits != REGTEST_BITS {
        return Err("bad-diffbits".to_string());
    }
    if !block.header.meets_target() {
        return Err("high-hash".to_string());
    }
    if !block.has_valid_merkle_root() {
        return Err("bad-txnmrklroot".to_string());
    }
    if block.header.time <= parent.block.header.time {
        return Err("time-too-old".to_string());
    }
    let Some(coinbase) = block.coinbase() else {
        return Err("bad-cb-missing".to_string());
    };
    if block.transactions[1..].iter().any(|tx| tx.is_coinbase()) {
        return Err("bad-cb-multiple".to_string());
    }
    if coinbase.coinbase_height() != Some(height) {
        return Err("bad-cb-height".to_string());
    }

    let txids = block.txids();
    let unique: HashSet<&Hash> = txids.iter().collect();
    if unique.len() != txids.len() {
        return Err("bad-txns-duplicate".to_string());
    }

    let mut utxos = parent.utxos().clone();
    let mut fees = 0u64;
    for tx in &block.transactions[1..] {
        let mut input_value = 0u64;
        for (index, input) in tx.inputs.iter().enumerate() {
            let coin = utxos
                .remove(&input.previous_output)
                .ok_or_else(|| "bad-txns-inputs-missingorspent".to_string())?;
            if coin.is_coinbase && height - coin.height < maturity {
                return Err("bad-txns-premature-spend-of-coinbase".to_string());
            }
            verify_input(tx, index, &coin.output)
                .map_err(|e| format!("mandatory-script-verify-flag-failed ({})", e))?;
            input_value += coin.output.value;
        }
        let output_value = tx.output_value();
        if output_value > input_value {
            return Err("bad-txns-in-belowout".to_string());
        }
        fees += input_value - output_value;
        add_outputs(&mut utxos, tx, height);
    }

    if coinbase.output_value() > BLOCK_SUBSIDY + fees {
        return Err("bad-cb-amount".to_string());
    }
    add_outputs(&mut utxos, coinbase, height);

    match find_miner_info_ref(block) {
        Ok(Some(reference)) => {
            if reference.height != height {
                return Err("bad-minerinfo-ref-height".to_string());
            }
            if !txids.contains(&reference.miner_info_tx) {
                return Err("bad-minerinfo-ref-missing".to_string());
            }
        }
        Ok(None) => {}
        Err(e) => return Err(format!("bad-minerinfo-ref ({})", e)),
    }

    Ok(utxos)
}
