// One miner taking part in a scenario: its node handle, data directory,
// key material and funding state.

use crate::funding::FundingRecord;
use crate::keys::ParticipantKeySet;
use crate::node::NodeRpc;
use minerid_common::transaction::Transaction;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

pub struct Participant {
    pub index: usize,
    /// Display name placed in the miner-info document
    pub name: String,
    pub node: Arc<dyn NodeRpc>,
    /// Data directory the node reads its funding files from
    pub datadir: PathBuf,
    pub keys: ParticipantKeySet,
    /// Harness-mined coinbase waiting to be split, once mined
    pub funding_source: Option<Transaction>,
    pub funding: Option<FundingRecord>,
}

impl Participant {
    pub fn new(
        index: usize,
        name: impl Into<String>,
        node: Arc<dyn NodeRpc>,
        datadir: impl Into<PathBuf>,
        keys: ParticipantKeySet,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            node,
            datadir: datadir.into(),
            keys,
            funding_source: None,
            funding: None,
        }
    }

    pub fn label(&self) -> &str {
        self.node.label()
    }

    pub fn is_funded(&self) -> bool {
        self.funding.is_some()
    }
}

impl Debug for Participant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("node", &self.node.label())
            .field("datadir", &self.datadir)
            .field("funded", &self.is_funded())
            .finish()
    }
}
