//! Scenario execution engine
//!
//! Runs a parsed [`ReorgScenario`] against a set of participant nodes. Steps
//! run strictly in order and every step is a barrier: the first failing
//! operation or invariant stops the run with a [`ScenarioFailure`] that
//! names the phase, the step and every participant's chain view.
//!
//! # Example
//!
//! ```rust,ignore
//! use minerid_testing_framework::scenarios::{default_scenario, ScenarioExecutor};
//!
//! let network = SimNetwork::builder().with_datadir_root(root.path()).build()?;
//! let mut executor = ScenarioExecutor::from_sim(config, clock, &network)?;
//! let report = executor.execute(&default_scenario()?).await?;
//!
//! assert!(report.success);
//! ```

use super::parser::{HeightExpect, HeightRef, ReorgScenario, Step};
use crate::config::HarnessConfig;
use crate::cycle::{CycleReport, IdentityTransactionCycle};
use crate::error::{HarnessError, HarnessResult, Phase, ScenarioFailure};
use crate::funding::FundingLifecycleManager;
use crate::invariants::InvariantChecker;
use crate::keys::KeyMaterialProvisioner;
use crate::node::{capture_views, ChainView, NodeRpc, RpcError};
use crate::orchestrator::{Clock, SeedSequence};
use crate::participant::Participant;
use crate::sim::SimNetwork;
use crate::topology::ChainTopologyController;
use crate::utilities::artifacts::{ArtifactCollector, FundingSnapshot};
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome of a completed scenario
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub scenario_name: String,
    pub steps_executed: usize,
    pub success: bool,
    pub cycles: Vec<CycleReport>,
    pub final_views: Vec<ChainView>,
    pub log: Vec<String>,
}

/// Scenario executor driving one node per participant
pub struct ScenarioExecutor {
    config: HarnessConfig,
    participants: Vec<Participant>,
    nodes: Vec<Arc<dyn NodeRpc>>,
    cycle: IdentityTransactionCycle,
    topology: ChainTopologyController,
    funding: FundingLifecycleManager,

    /// Heights recorded by `mark` steps
    marks: IndexMap<String, u64>,

    /// Views of every participant recorded by `snapshot` steps
    snapshots: IndexMap<String, Vec<ChainView>>,

    cycles: Vec<CycleReport>,
    phase: Phase,
    partitioned: bool,

    /// Execution log
    log: Vec<String>,

    /// Current step number (1-indexed)
    current_step: usize,
}

impl ScenarioExecutor {
    /// One participant per `(node, datadir)` pair, keyed from
    /// `config.seed_start` upwards
    pub fn new(
        config: HarnessConfig,
        clock: Arc<dyn Clock>,
        nodes: Vec<(Arc<dyn NodeRpc>, PathBuf)>,
    ) -> HarnessResult<Self> {
        config.validate()?;
        if nodes.is_empty() {
            return Err(HarnessError::Config("at least one node is required".into()));
        }

        let provisioner = KeyMaterialProvisioner::new(Arc::new(SeedSequence::new(config.seed_start)));
        let mut participants = Vec::with_capacity(nodes.len());
        for (index, (node, datadir)) in nodes.iter().enumerate() {
            let keys = provisioner.provision(index).map_err(|e| {
                HarnessError::Config(format!("key derivation for participant {}: {}", index, e))
            })?;
            participants.push(Participant::new(
                index,
                config.miner_name(index),
                node.clone(),
                datadir.clone(),
                keys,
            ));
        }

        Ok(Self {
            cycle: IdentityTransactionCycle::from_config(clock.clone(), &config),
            topology: ChainTopologyController::new(clock, config.wait_policy()),
            funding: FundingLifecycleManager::new(config.funding_write_mode),
            nodes: nodes.into_iter().map(|(node, _)| node).collect(),
            participants,
            config,
            marks: IndexMap::new(),
            snapshots: IndexMap::new(),
            cycles: Vec::new(),
            phase: Phase::Setup,
            partitioned: false,
            log: Vec::new(),
            current_step: 0,
        })
    }

    /// Drive every node of a simulated network
    pub fn from_sim(
        config: HarnessConfig,
        clock: Arc<dyn Clock>,
        network: &SimNetwork,
    ) -> HarnessResult<Self> {
        let nodes = network
            .nodes()
            .into_iter()
            .map(|node| {
                let datadir = node.datadir().to_path_buf();
                (Arc::new(node) as Arc<dyn NodeRpc>, datadir)
            })
            .collect();
        Self::new(config, clock, nodes)
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn marks(&self) -> &IndexMap<String, u64> {
        &self.marks
    }

    pub fn cycles(&self) -> &[CycleReport] {
        &self.cycles
    }

    /// Execute a complete scenario, stopping at the first failure
    pub async fn execute(
        &mut self,
        scenario: &ReorgScenario,
    ) -> Result<ExecutionReport, ScenarioFailure> {
        self.log.clear();
        self.cycles.clear();
        self.marks.clear();
        self.snapshots.clear();
        self.current_step = 0;
        self.phase = Phase::Setup;

        self.log(format!("Starting scenario: {}", scenario.name));
        if let Some(desc) = &scenario.description {
            self.log(format!("Description: {}", desc.trim()));
        }

        if scenario.participants != self.participants.len() {
            let error = HarnessError::Scenario(format!(
                "scenario needs {} participants, {} nodes configured",
                scenario.participants,
                self.participants.len()
            ));
            return Err(self.fail(scenario, error).await);
        }

        for (idx, step) in scenario.steps.iter().enumerate() {
            self.current_step = idx + 1;
            self.log(format!("\n--- Step {}: {} ---", self.current_step, step.action()));
            debug!("step {}: {:?}", self.current_step, step);

            if let Err(error) = self.execute_step(step).await {
                return Err(self.fail(scenario, error).await);
            }
        }

        let final_views = match capture_views(&self.nodes).await {
            Ok(views) => views,
            Err(e) => {
                let error = HarnessError::Scenario(format!("final capture failed: {:#}", e));
                return Err(self.fail(scenario, error).await);
            }
        };
        for view in &final_views {
            self.log(format!("  {}", view));
        }
        self.log("\n=== Scenario completed successfully ===".to_string());
        info!(
            "scenario '{}' passed: {} steps, {} cycles",
            scenario.name,
            self.current_step,
            self.cycles.len()
        );

        Ok(ExecutionReport {
            scenario_name: scenario.name.clone(),
            steps_executed: self.current_step,
            success: true,
            cycles: self.cycles.clone(),
            final_views,
            log: self.log.clone(),
        })
    }

    async fn execute_step(&mut self, step: &Step) -> HarnessResult<()> {
        match step {
            Step::Join { a, b } => {
                if self.partitioned && self.any_funded() {
                    self.phase = Phase::Reconnect;
                }
                let (a_node, b_node) = (self.nodes[*a].clone(), self.nodes[*b].clone());
                self.topology.join(&*a_node, &*b_node).await?;
                self.partitioned = false;
                self.log(format!("✓ {} joined {}", a_node.label(), b_node.label()));
            }
            Step::Partition { a, b } => {
                if self.any_funded() {
                    self.phase = Phase::Fork;
                }
                let (a_node, b_node) = (self.nodes[*a].clone(), self.nodes[*b].clone());
                self.topology.partition(&*a_node, &*b_node).await?;
                self.partitioned = true;
                self.log(format!("✓ {} partitioned from {}", a_node.label(), b_node.label()));
            }
            Step::Sync { mempools } => {
                let tip = self.topology.await_convergence(&self.nodes).await?;
                if *mempools {
                    self.topology.await_mempool_convergence(&self.nodes).await?;
                }
                self.log(format!("✓ Synced at height {} ({})", tip.height, tip.hash));
            }
            Step::SyncMempools => {
                let views = self.topology.await_mempool_convergence(&self.nodes).await?;
                let size = views.first().map(|v| v.mempool.len()).unwrap_or(0);
                self.log(format!("✓ Mempools synced ({} tx)", size));
            }
            Step::MineCoinbase { participant } => {
                self.topology.require_settled()?;
                let node = self.nodes[*participant].clone();
                let tag = format!("{}/funding", self.participants[*participant].name);
                let source = self.funding.mine_funding_source(&*node, &tag).await?;
                self.log(format!("✓ Funding source {} mined by {}", source.txid(), node.label()));
                self.participants[*participant].funding_source = Some(source);
            }
            Step::Generate {
                participant,
                blocks,
            } => {
                self.topology.require_settled()?;
                let node = self.nodes[*participant].clone();
                let hashes = node
                    .generate(*blocks)
                    .await
                    .map_err(|e| HarnessError::rpc(node.label(), e))?;
                self.log(format!("✓ {} generated {} block(s)", node.label(), hashes.len()));
            }
            Step::Fund { participant } => self.fund(*participant).await?,
            Step::Cycle {
                participant,
                mine,
                count,
                sync,
            } => {
                for _ in 0..*count {
                    self.run_cycle(*participant, *mine, *sync).await?;
                }
            }
            Step::Mark { name, participant } => {
                let node = self.nodes[*participant].clone();
                let height = node
                    .get_block_count()
                    .await
                    .map_err(|e| HarnessError::rpc(node.label(), e))?;
                self.marks.insert(name.clone(), height);
                self.log(format!("✓ Marked {} = {} ({})", name, height, node.label()));
            }
            Step::Snapshot { name } => {
                let views = self.capture_all().await?;
                for view in &views {
                    self.log(format!("  {}", view));
                }
                self.snapshots.insert(name.clone(), views);
                self.log(format!("✓ Snapshot {} taken", name));
            }
            Step::AssertDiverged { a, b } => {
                let a_view = self.capture(*a).await?;
                let b_view = self.capture(*b).await?;
                InvariantChecker::tips_differ(&a_view, &b_view)?;
                InvariantChecker::heights_differ(&a_view, &b_view)?;
                self.log(format!(
                    "✓ Diverged: {}@{} vs {}@{}",
                    a_view.label, a_view.tip_height, b_view.label, b_view.tip_height
                ));
            }
            Step::AssertHeight {
                participant,
                expect,
            } => {
                let view = self.capture(*participant).await?;
                match expect {
                    HeightExpect::Eq { eq } => {
                        let expected = self.resolve(eq)?;
                        InvariantChecker::height_eq(&view, expected)?;
                        self.log(format!("✓ {} height == {} ({})", view.label, expected, eq));
                    }
                    HeightExpect::AtMost { at_most } => {
                        let max = self.resolve(at_most)?;
                        InvariantChecker::height_at_most(&view, max)?;
                        self.log(format!(
                            "✓ {} height {} <= {} ({})",
                            view.label, view.tip_height, max, at_most
                        ));
                    }
                }
            }
            Step::AssertConvergedTo {
                snapshot,
                participant,
            } => {
                let expected = self.snapshot_view(snapshot, *participant)?;
                let views = self.capture_all().await?;
                InvariantChecker::converged_to(&views, &expected)?;
                self.log(format!(
                    "✓ Converged to {}@{} from snapshot {}",
                    expected.tip_hash, expected.tip_height, snapshot
                ));
            }
            Step::AssertUnchanged {
                snapshot,
                participant,
            } => {
                let before = self.snapshot_view(snapshot, *participant)?;
                let after = self.capture(*participant).await?;
                InvariantChecker::unchanged(&before, &after)?;
                self.log(format!("✓ {} unchanged since snapshot {}", after.label, snapshot));
            }
            Step::AssertFundingAnchored { participant } => {
                let view = self.capture(*participant).await?;
                let record = self.participants[*participant].funding.as_ref();
                let txid = record.map(|record| record.first_outpoint.txid);
                let confirmed = match txid {
                    Some(txid) if !view.mempool.contains(&txid) => {
                        let node = &self.nodes[*participant];
                        match node.get_raw_transaction(&txid).await {
                            Ok(_) => true,
                            Err(e) if RpcError::classify(&e).is_some_and(RpcError::is_not_found) => {
                                false
                            }
                            Err(e) => return Err(HarnessError::rpc(node.label(), e)),
                        }
                    }
                    _ => false,
                };
                InvariantChecker::funding_anchored(&view, record, confirmed)?;
                self.log(format!(
                    "✓ {} funding anchored ({})",
                    view.label,
                    if confirmed { "confirmed" } else { "pending" }
                ));
            }
            Step::Rollback {
                participant,
                mark,
                offset,
            } => {
                self.phase = Phase::Rollback;
                let height = self.resolve(&HeightRef::Marked {
                    mark: mark.clone(),
                    offset: *offset,
                })?;
                let node = self.nodes[*participant].clone();
                let hash = node
                    .get_block_hash(height)
                    .await
                    .map_err(|e| HarnessError::rpc(node.label(), e))?;
                self.topology.rollback(&self.nodes, &hash).await?;
                self.log(format!(
                    "✓ Invalidated {} at height {} on every node",
                    hash, height
                ));
            }
        }
        Ok(())
    }

    async fn fund(&mut self, participant: usize) -> HarnessResult<()> {
        self.phase = Phase::Funding { participant };
        let source = self.participants[participant]
            .funding_source
            .clone()
            .ok_or_else(|| {
                HarnessError::Scenario(format!(
                    "participant {} has no funding source, mine_coinbase must come first",
                    participant
                ))
            })?;

        let p = &self.participants[participant];
        let (split, record) = self
            .funding
            .fund(&*p.node, &p.keys, &p.datadir, &source)
            .await?;
        let view = self.capture(participant).await?;
        InvariantChecker::funding_anchored(&view, Some(&record), false)?;

        self.log(format!(
            "✓ {} funded: split {} -> {}",
            view.label,
            split.txid(),
            record.destination
        ));
        self.participants[participant].funding = Some(record);
        Ok(())
    }

    async fn run_cycle(&mut self, participant: usize, mine: bool, sync: bool) -> HarnessResult<()> {
        self.topology.require_settled()?;
        self.phase = Phase::Cycle {
            number: self.cycles.len() + 1,
            participant,
        };

        let p = &self.participants[participant];
        if !p.is_funded() {
            return Err(HarnessError::Scenario(format!(
                "participant {} cannot run a cycle before funding",
                participant
            )));
        }
        let height = p
            .node
            .get_block_count()
            .await
            .map_err(|e| HarnessError::rpc(p.label(), e))?
            + 1;
        let report = self
            .cycle
            .run_cycle(&*p.node, &p.keys, height, &p.name, mine)
            .await?;

        self.log(format!(
            "✓ Cycle {} ({}): {} -> {}",
            self.cycles.len() + 1,
            self.participants[participant].label(),
            report.txid,
            report
                .final_state()
                .map(|state| state.to_string())
                .unwrap_or_default()
        ));
        self.cycles.push(report);

        if sync {
            self.topology.await_convergence(&self.nodes).await?;
        }
        Ok(())
    }

    fn any_funded(&self) -> bool {
        self.participants.iter().any(Participant::is_funded)
    }

    fn resolve(&self, height: &HeightRef) -> HarnessResult<u64> {
        match height {
            HeightRef::Absolute(h) => Ok(*h),
            HeightRef::Marked { mark, offset } => {
                let base = self
                    .marks
                    .get(mark)
                    .ok_or_else(|| HarnessError::Scenario(format!("unknown mark '{}'", mark)))?;
                base.checked_add_signed(*offset).ok_or_else(|| {
                    HarnessError::Scenario(format!("height {} is out of range", height))
                })
            }
        }
    }

    fn snapshot_view(&self, snapshot: &str, participant: usize) -> HarnessResult<ChainView> {
        self.snapshots
            .get(snapshot)
            .and_then(|views| views.get(participant))
            .cloned()
            .ok_or_else(|| {
                HarnessError::Scenario(format!(
                    "snapshot '{}' has no view of participant {}",
                    snapshot, participant
                ))
            })
    }

    async fn capture(&self, participant: usize) -> HarnessResult<ChainView> {
        let node = &self.nodes[participant];
        ChainView::capture(node.as_ref())
            .await
            .map_err(|e| HarnessError::rpc(node.label(), e))
    }

    async fn capture_all(&self) -> HarnessResult<Vec<ChainView>> {
        let mut views = Vec::with_capacity(self.nodes.len());
        for index in 0..self.nodes.len() {
            views.push(self.capture(index).await?);
        }
        Ok(views)
    }

    /// Turn `error` into a failure report, writing an artifact when an
    /// artifacts directory is configured
    async fn fail(&mut self, scenario: &ReorgScenario, error: HarnessError) -> ScenarioFailure {
        let views = match capture_views(&self.nodes).await {
            Ok(views) => views,
            Err(e) => {
                warn!("could not capture views after failure: {:#}", e);
                Vec::new()
            }
        };
        let failure = ScenarioFailure {
            phase: self.phase.clone(),
            step: self.current_step,
            error,
            views,
        };
        error!("{}", failure);
        self.log(format!("✗ {}", failure));

        if let Some(dir) = self.config.artifacts_dir.clone() {
            match self.write_artifact(scenario, &failure, &dir).await {
                Ok(path) => info!("failure artifact written to {}", path.display()),
                Err(e) => warn!("could not write failure artifact: {:#}", e),
            }
        }
        failure
    }

    async fn write_artifact(
        &self,
        scenario: &ReorgScenario,
        failure: &ScenarioFailure,
        dir: &std::path::Path,
    ) -> anyhow::Result<PathBuf> {
        let mut collector = ArtifactCollector::new(&scenario.name);
        collector.record_failure(failure);
        match self.topology.snapshot(&self.nodes).await {
            Ok(topology) => collector.save_topology(topology),
            Err(e) => debug!("no topology in artifact: {}", e),
        }
        for participant in &self.participants {
            if let Some(record) = &participant.funding {
                collector.add_funding(FundingSnapshot::new(participant.index, record));
            }
        }
        for cycle in &self.cycles {
            collector.add_cycle(cycle.clone());
        }
        for line in &self.log {
            collector.capture_log("INFO", line.trim());
        }
        collector.save(dir).await
    }

    fn log(&mut self, message: String) {
        debug!("{}", message.trim());
        self.log.push(message);
    }
}
