//! Common imports for harness users and tests
//!
//! ```rust,ignore
//! use minerid_testing_framework::prelude::*;
//! ```

pub use crate::config::{FundingWriteMode, HarnessConfig, WaitConfig};
pub use crate::cycle::{CandidateBlock, CycleOutcome, CycleReport, CycleState, IdentityTransactionCycle};
pub use crate::error::{ErrorKind, HarnessError, HarnessResult, Phase, ScenarioFailure, Violation};
pub use crate::funding::{FundingLifecycleManager, FundingRecord};
pub use crate::invariants::InvariantChecker;
pub use crate::keys::{KeyMaterialProvisioner, KeyRole, ParticipantKeySet};
pub use crate::node::{
    capture_views, BlockAcceptance, BlockInfo, ChainView, JsonRpcNode, NodeRpc, RpcEndpoint,
    TipInfo, TxAcceptance, WaitError, WaitPolicy,
};
pub use crate::orchestrator::{Clock, PausedClock, SeedSequence, SystemClock};
pub use crate::participant::Participant;
pub use crate::scenarios::{
    default_scenario, parse_scenario, ExecutionReport, ReorgScenario, ScenarioExecutor, Step,
};
pub use crate::sim::{SimConfig, SimFaults, SimNetwork, SimNode};
pub use crate::topology::{ChainTopologyController, TopologySnapshot};
pub use crate::utilities::artifacts::{ArtifactCollector, ScenarioArtifact};
pub use crate::utilities::storage::{create_temp_datadir, FundingStore, TempDataDir};

pub use std::sync::Arc;
pub use tokio::time::Duration;
