// File: testing-framework/src/utilities/artifacts.rs
//
// Failure Artifact Collection
//
// When a scenario stops, everything needed to diagnose it without a rerun
// is written to one JSON file: the failing phase and error kind, every
// participant's chain view, the peer topology, funding records, the cycles
// that completed and the executor log.

use crate::cycle::CycleReport;
use crate::error::{ErrorKind, Phase, ScenarioFailure};
use crate::funding::FundingRecord;
use crate::node::ChainView;
use crate::topology::TopologySnapshot;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Funding lineage root of one participant, without its key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingSnapshot {
    pub participant: usize,
    pub destination: String,
    /// `txid:vout`
    pub first_outpoint: String,
}

impl FundingSnapshot {
    pub fn new(participant: usize, record: &FundingRecord) -> Self {
        Self {
            participant,
            destination: record.destination.clone(),
            first_outpoint: record.first_outpoint.to_string(),
        }
    }
}

/// Run metadata for reproduction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub scenario_name: String,
    /// When the collector was created
    pub timestamp: String,
    pub duration_ms: u64,
    pub failure_reason: Option<String>,
    pub failure_kind: Option<ErrorKind>,
    pub phase: Option<Phase>,
    pub step: Option<usize>,
}

/// Log entry captured during execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

/// Complete failure artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioArtifact {
    pub metadata: ArtifactMetadata,
    pub topology: Option<TopologySnapshot>,
    pub views: Vec<ChainView>,
    pub funding: Vec<FundingSnapshot>,
    pub cycles: Vec<CycleReport>,
    pub logs: Vec<LogEntry>,
}

/// Collects scenario state and writes it out as a [`ScenarioArtifact`]
///
/// # Examples
///
/// ```rust,ignore
/// let mut collector = ArtifactCollector::new("minerinfo_reorg");
/// collector.record_failure(&failure);
/// collector.save_topology(topology.snapshot(&nodes).await?);
/// let path = collector.save("./artifacts/").await?;
/// ```
pub struct ArtifactCollector {
    metadata: ArtifactMetadata,
    topology: Option<TopologySnapshot>,
    views: Vec<ChainView>,
    funding: Vec<FundingSnapshot>,
    cycles: Vec<CycleReport>,
    logs: Vec<LogEntry>,
    start_time: std::time::Instant,
}

impl ArtifactCollector {
    pub fn new(scenario_name: impl Into<String>) -> Self {
        Self {
            metadata: ArtifactMetadata {
                scenario_name: scenario_name.into(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                duration_ms: 0,
                failure_reason: None,
                failure_kind: None,
                phase: None,
                step: None,
            },
            topology: None,
            views: Vec::new(),
            funding: Vec::new(),
            cycles: Vec::new(),
            logs: Vec::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn set_failure_reason(&mut self, reason: String) {
        self.metadata.failure_reason = Some(reason);
    }

    /// Take reason, kind, phase, step and views from `failure`
    pub fn record_failure(&mut self, failure: &ScenarioFailure) {
        self.metadata.failure_reason = Some(failure.error.to_string());
        self.metadata.failure_kind = Some(failure.kind());
        self.metadata.phase = Some(failure.phase.clone());
        self.metadata.step = Some(failure.step);
        self.views = failure.views.clone();
    }

    pub fn save_topology(&mut self, topology: TopologySnapshot) {
        self.topology = Some(topology);
    }

    pub fn add_view(&mut self, view: ChainView) {
        self.views.push(view);
    }

    pub fn add_funding(&mut self, funding: FundingSnapshot) {
        self.funding.push(funding);
    }

    pub fn add_cycle(&mut self, cycle: CycleReport) {
        self.cycles.push(cycle);
    }

    pub fn capture_log(&mut self, level: impl Into<String>, message: impl Into<String>) {
        self.logs.push(LogEntry {
            level: level.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
    }

    /// Write the artifact as pretty JSON under `output_dir`. The filename
    /// carries the scenario name and a timestamp.
    pub async fn save(&mut self, output_dir: impl AsRef<Path>) -> Result<PathBuf> {
        self.metadata.duration_ms = self.start_time.elapsed().as_millis() as u64;

        let artifact = ScenarioArtifact {
            metadata: self.metadata.clone(),
            topology: self.topology.clone(),
            views: self.views.clone(),
            funding: self.funding.clone(),
            cycles: self.cycles.clone(),
            logs: self.logs.clone(),
        };

        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir)
            .await
            .context("Failed to create artifact directory")?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let name: String = self
            .metadata
            .scenario_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let filepath = output_dir.join(format!("{}_{}.json", name, timestamp));

        let json =
            serde_json::to_string_pretty(&artifact).context("Failed to serialize artifact")?;
        let mut file = fs::File::create(&filepath)
            .await
            .context("Failed to create artifact file")?;
        file.write_all(json.as_bytes())
            .await
            .context("Failed to write artifact data")?;
        file.flush()
            .await
            .context("Failed to flush artifact file")?;

        Ok(filepath)
    }

    pub async fn load(filepath: impl AsRef<Path>) -> Result<ScenarioArtifact> {
        let content = fs::read_to_string(filepath.as_ref())
            .await
            .context("Failed to read artifact file")?;
        serde_json::from_str(&content).context("Failed to parse artifact JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HarnessError, Violation};
    use crate::utilities::storage::create_temp_datadir;
    use minerid_common::crypto::{hash256, KeyPair};
    use minerid_common::transaction::OutPoint;
    use std::collections::{BTreeMap, BTreeSet};

    fn view(label: &str, height: u64) -> ChainView {
        ChainView {
            label: label.to_string(),
            tip_hash: hash256(label.as_bytes()),
            tip_height: height,
            mempool: BTreeSet::new(),
        }
    }

    #[test]
    fn test_collector_creation() {
        let collector = ArtifactCollector::new("minerinfo reorg");
        assert_eq!(collector.metadata.scenario_name, "minerinfo reorg");
        assert!(collector.metadata.failure_reason.is_none());
        assert!(collector.views.is_empty());
    }

    #[test]
    fn test_record_failure_copies_context() {
        let mut collector = ArtifactCollector::new("reorg");
        let failure = ScenarioFailure {
            phase: Phase::Reconnect,
            step: 21,
            error: HarnessError::violation(Violation::new("converged_to", "node0 stayed")),
            views: vec![view("node0", 107), view("node1", 111)],
        };
        collector.record_failure(&failure);
        assert_eq!(collector.metadata.failure_kind, Some(ErrorKind::InvariantViolation));
        assert_eq!(collector.metadata.phase, Some(Phase::Reconnect));
        assert_eq!(collector.metadata.step, Some(21));
        assert_eq!(collector.views.len(), 2);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = create_temp_datadir().unwrap();
        let mut collector = ArtifactCollector::new("minerinfo reorg");
        collector.set_failure_reason("tips did not converge".to_string());
        collector.add_view(view("node0", 3));
        collector.save_topology(TopologySnapshot {
            node_count: 2,
            connections: BTreeMap::from([(0, vec![]), (1, vec![])]),
            partitions: vec![(0, 1)],
        });
        let record = FundingRecord {
            destination: "mdest".to_string(),
            first_outpoint: OutPoint::new(hash256(b"split"), 0),
            private_key: KeyPair::from_seed(&[9]).unwrap(),
        };
        collector.add_funding(FundingSnapshot::new(1, &record));
        collector.capture_log("INFO", "--- Step 1: join ---");

        let path = collector.save(dir.path()).await.unwrap();
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with("minerinfo_reorg_"));
        assert!(file_name.ends_with(".json"));

        let loaded = ArtifactCollector::load(&path).await.unwrap();
        assert_eq!(
            loaded.metadata.failure_reason.as_deref(),
            Some("tips did not converge")
        );
        assert_eq!(loaded.views, vec![view("node0", 3)]);
        assert_eq!(loaded.topology.unwrap().partitions, vec![(0, 1)]);
        assert_eq!(loaded.funding[0].participant, 1);
        assert!(loaded.funding[0].first_outpoint.ends_with(":0"));
        assert_eq!(loaded.logs.len(), 1);

        // the private key never reaches the artifact
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("private_key"));
    }
}
