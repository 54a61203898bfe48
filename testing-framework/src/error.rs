// File: testing-framework/src/error.rs
//
// Harness Errors
//
// Every way a scenario can stop. Timeouts, node rejections and invariant
// violations are the three outcomes a run reports about the system under
// test; everything else is a harness-side failure.

use crate::node::{ChainView, WaitError};
use minerid_common::{crypto::Hash, script::ScriptError};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use strum::Display as StrumDisplay;
use thiserror::Error;

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A barrier predicate never held
    Timeout,
    /// The node refused an operation
    Rejection,
    /// A post-condition failed although every operation succeeded
    InvariantViolation,
    /// Transport, storage, configuration or scenario authoring problem
    Harness,
}

/// A failed post-condition, with the state needed to diagnose it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub check: String,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<Hash>,
    pub views: Vec<ChainView>,
}

impl Violation {
    pub fn new(check: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            detail: detail.into(),
            txid: None,
            views: Vec::new(),
        }
    }

    pub fn with_txid(mut self, txid: Hash) -> Self {
        self.txid = Some(txid);
        self
    }

    pub fn with_views(mut self, views: Vec<ChainView>) -> Self {
        self.views = views;
        self
    }
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.check, self.detail)?;
        if let Some(txid) = &self.txid {
            write!(f, " (tx {})", txid)?;
        }
        for view in &self.views {
            write!(f, "; {}", view)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("funding transaction {txid} rejected by {node}: {reason}")]
    FundingRejected {
        node: String,
        txid: Hash,
        reason: String,
    },

    #[error("block {hash} rejected by {node}: {reason}")]
    BlockRejected {
        node: String,
        hash: Hash,
        reason: String,
    },

    #[error("candidate block built on {built_on} is stale, {node} tip is now {tip}")]
    StaleCandidate {
        node: String,
        built_on: Hash,
        tip: Hash,
    },

    #[error("{node} refused to build miner-info transaction at height {height}: {reason:#}")]
    MinerInfoRejected {
        node: String,
        height: u64,
        reason: anyhow::Error,
    },

    #[error("miner-info transaction {txid} not admitted to mempool: {source}")]
    MempoolAdmissionTimeout {
        txid: Hash,
        #[source]
        source: WaitError,
    },

    #[error("block {hash} not accepted: {source}")]
    BlockAcceptanceTimeout {
        hash: Hash,
        #[source]
        source: WaitError,
    },

    #[error("participants did not converge: {source}")]
    ConvergenceTimeout {
        #[source]
        source: WaitError,
    },

    #[error("peer link did not settle: {source}")]
    TopologyTimeout {
        #[source]
        source: WaitError,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(Box<Violation>),

    #[error("identity transaction for height {requested} is stale, {node} tip is at {tip_height}")]
    StaleHeight {
        node: String,
        requested: u64,
        tip_height: u64,
    },

    #[error("rpc call to {node} failed: {source:#}")]
    Rpc {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("funding storage: {0}")]
    Storage(#[from] std::io::Error),

    #[error("script construction failed: {0}")]
    Script(#[from] ScriptError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("scenario error: {0}")]
    Scenario(String),
}

impl HarnessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MempoolAdmissionTimeout { source, .. }
            | Self::BlockAcceptanceTimeout { source, .. }
            | Self::ConvergenceTimeout { source }
            | Self::TopologyTimeout { source } => match source {
                WaitError::Timeout { .. } => ErrorKind::Timeout,
                WaitError::Rpc { .. } => ErrorKind::Harness,
            },
            Self::FundingRejected { .. }
            | Self::BlockRejected { .. }
            | Self::StaleCandidate { .. }
            | Self::MinerInfoRejected { .. } => ErrorKind::Rejection,
            Self::InvariantViolation(_) => ErrorKind::InvariantViolation,
            Self::StaleHeight { .. }
            | Self::Rpc { .. }
            | Self::Storage(_)
            | Self::Script(_)
            | Self::Config(_)
            | Self::Scenario(_) => ErrorKind::Harness,
        }
    }

    /// A rejection a retrying caller may treat as routine
    pub fn is_expected_rejection(&self) -> bool {
        matches!(self, Self::StaleCandidate { .. })
    }

    pub fn violation(violation: Violation) -> Self {
        Self::InvariantViolation(Box::new(violation))
    }

    /// Wrap a transport failure against `node`
    pub fn rpc(node: &str, source: anyhow::Error) -> Self {
        Self::Rpc {
            node: node.to_string(),
            source,
        }
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// Step of the scenario that was executing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum Phase {
    Setup,
    Funding { participant: usize },
    Cycle { number: usize, participant: usize },
    Fork,
    Reconnect,
    Rollback,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Setup => write!(f, "setup"),
            Phase::Funding { participant } => write!(f, "funding (participant {})", participant),
            Phase::Cycle {
                number,
                participant,
            } => write!(f, "cycle {} (participant {})", number, participant),
            Phase::Fork => write!(f, "fork"),
            Phase::Reconnect => write!(f, "reconnect"),
            Phase::Rollback => write!(f, "rollback"),
        }
    }
}

/// A scenario stopped at its first violated contract
#[derive(Debug, Error)]
pub struct ScenarioFailure {
    pub phase: Phase,
    pub step: usize,
    #[source]
    pub error: HarnessError,
    /// Views of every participant captured when the failure was reported
    pub views: Vec<ChainView>,
}

impl ScenarioFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl Display for ScenarioFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failure during {} at step {}: {}",
            self.kind(),
            self.phase,
            self.step,
            self.error
        )?;
        for view in &self.views {
            write!(f, "\n  {}", view)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tokio::time::Duration;

    fn timeout() -> WaitError {
        WaitError::Timeout {
            what: "tx in mempool".to_string(),
            waited: Duration::from_secs(60),
            last_observed: "0 mempool entries".to_string(),
        }
    }

    #[test]
    fn test_kinds() {
        let err = HarnessError::MempoolAdmissionTimeout {
            txid: Hash::zero(),
            source: timeout(),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let err = HarnessError::ConvergenceTimeout {
            source: WaitError::Rpc {
                what: "all tips equal".to_string(),
                source: anyhow::anyhow!("connection refused"),
            },
        };
        assert_eq!(err.kind(), ErrorKind::Harness);

        let err = HarnessError::violation(Violation::new("tips_equal", "differ"));
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);

        let err = HarnessError::StaleCandidate {
            node: "node0".to_string(),
            built_on: Hash::zero(),
            tip: Hash::zero(),
        };
        assert_eq!(err.kind(), ErrorKind::Rejection);
        assert!(err.is_expected_rejection());

        let err = HarnessError::BlockRejected {
            node: "node0".to_string(),
            hash: Hash::zero(),
            reason: "bad-txnmrklroot".to_string(),
        };
        assert!(!err.is_expected_rejection());
    }

    #[test]
    fn test_failure_display_names_phase_and_views() {
        let view = ChainView {
            label: "node1".to_string(),
            tip_hash: Hash::zero(),
            tip_height: 111,
            mempool: BTreeSet::new(),
        };
        let failure = ScenarioFailure {
            phase: Phase::Cycle {
                number: 4,
                participant: 1,
            },
            step: 17,
            error: HarnessError::violation(
                Violation::new("mined_exactly_once", "tx still in mempool")
                    .with_txid(Hash::zero()),
            ),
            views: vec![view],
        };
        let text = failure.to_string();
        assert!(text.starts_with("invariant_violation failure during cycle 4 (participant 1)"));
        assert!(text.contains("step 17"));
        assert!(text.contains("height 111"));
    }
}
