// File: testing-framework/src/config.rs
//
// Harness Configuration
//
// Loaded from YAML; every field has a default so an empty document is a
// valid configuration.

use crate::error::{HarnessError, HarnessResult};
use crate::node::WaitPolicy;
use crate::sim::SimConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};
use tokio::time::Duration;

/// How funding records reach disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FundingWriteMode {
    /// Replace the record of the participant atomically
    #[default]
    Upsert,
    /// Append records back to back; readers take the last one
    Append,
}

/// Barrier polling schedule, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub timeout_ms: u64,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_factor: f64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            initial_interval_ms: 50,
            max_interval_ms: 1_000,
            backoff_factor: 1.5,
        }
    }
}

impl WaitConfig {
    pub fn policy(&self) -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            backoff_factor: self.backoff_factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub wait: WaitConfig,
    /// Display name written into each participant's attestations
    pub miner_names: Vec<String>,
    pub public_ip: String,
    pub public_port: u16,
    /// First key-derivation seed handed out
    pub seed_start: u64,
    pub funding_write_mode: FundingWriteMode,
    /// Where failure artifacts go; none are written when unset
    pub artifacts_dir: Option<PathBuf>,
    pub sim: SimConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            wait: WaitConfig::default(),
            miner_names: vec!["miner name 0".to_string(), "miner name 1".to_string()],
            public_ip: "127.0.0.1".to_string(),
            public_port: 8333,
            seed_start: 2,
            funding_write_mode: FundingWriteMode::default(),
            artifacts_dir: None,
            sim: SimConfig::default(),
        }
    }
}

impl HarnessConfig {
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| HarnessError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
            HarnessError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.wait.timeout_ms == 0 {
            return Err(HarnessError::Config("wait.timeout_ms must be positive".into()));
        }
        if self.wait.initial_interval_ms == 0
            || self.wait.max_interval_ms < self.wait.initial_interval_ms
        {
            return Err(HarnessError::Config(
                "wait intervals must satisfy 0 < initial_interval_ms <= max_interval_ms".into(),
            ));
        }
        if self.wait.backoff_factor < 1.0 {
            return Err(HarnessError::Config("wait.backoff_factor must be >= 1.0".into()));
        }
        // Seeds 0 and 1 are kept for fixtures
        if self.seed_start < 2 {
            return Err(HarnessError::Config("seed_start must be at least 2".into()));
        }
        Ok(())
    }

    /// Display name for participant `index`
    pub fn miner_name(&self, index: usize) -> String {
        self.miner_names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("miner name {}", index))
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.wait.policy()
    }
}
