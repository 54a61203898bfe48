//! Scenario plans and their executor
//!
//! A scenario is a YAML list of `action`-tagged steps run against one node
//! per participant:
//!
//! ```yaml
//! name: "short fork"
//! participants: 2
//! steps:
//!   - action: partition
//!     a: 0
//!     b: 1
//!   - action: generate
//!     participant: 1
//!     blocks: 2
//!   - action: join
//!     a: 0
//!     b: 1
//!   - action: sync
//!   - action: assert_height
//!     participant: 0
//!     eq: 2
//! ```
//!
//! [`DEFAULT_SCENARIO`] is the two-miner fork, reconnect and rollback run.

pub mod executor;
pub mod parser;

pub use executor::{ExecutionReport, ScenarioExecutor};
pub use parser::{parse_scenario, HeightExpect, HeightRef, ReorgScenario, Step};

/// Built-in miner-info fork/reorg scenario
pub const DEFAULT_SCENARIO: &str = include_str!("../../scenarios/minerinfo_reorg.yaml");

pub fn default_scenario() -> anyhow::Result<ReorgScenario> {
    parse_scenario(DEFAULT_SCENARIO)
}
