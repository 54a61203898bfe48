//! YAML scenario plans
//!
//! A plan names how many participants it drives and lists `action`-tagged
//! steps. Heights in assertions are either absolute or relative to a height
//! recorded earlier with `mark`:
//!
//! ```yaml
//! - action: mark
//!   name: fork
//!   participant: 0
//! - action: assert_height
//!   participant: 1
//!   at_most: { mark: fork, offset: 1 }
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};

fn default_participants() -> usize {
    2
}

fn default_count() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// Parsed scenario plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorgScenario {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_participants")]
    pub participants: usize,
    pub steps: Vec<Step>,
}

/// Height given directly or as an offset from a marked height
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeightRef {
    Absolute(u64),
    Marked {
        mark: String,
        #[serde(default)]
        offset: i64,
    },
}

impl HeightRef {
    fn mark(&self) -> Option<&str> {
        match self {
            HeightRef::Absolute(_) => None,
            HeightRef::Marked { mark, .. } => Some(mark),
        }
    }
}

impl Display for HeightRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HeightRef::Absolute(height) => write!(f, "{}", height),
            HeightRef::Marked { mark, offset } if *offset == 0 => write!(f, "{}", mark),
            HeightRef::Marked { mark, offset } => write!(f, "{}{:+}", mark, offset),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeightExpect {
    Eq { eq: HeightRef },
    AtMost { at_most: HeightRef },
}

impl HeightExpect {
    fn height(&self) -> &HeightRef {
        match self {
            HeightExpect::Eq { eq } => eq,
            HeightExpect::AtMost { at_most } => at_most,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Connect two participants (no-op when already connected)
    Join { a: usize, b: usize },
    /// Disconnect two participants (no-op when already apart)
    Partition { a: usize, b: usize },
    /// Wait for equal tips, and equal mempools when `mempools` is set
    Sync {
        #[serde(default)]
        mempools: bool,
    },
    SyncMempools,
    /// Submit a block paying an anyone-can-spend funding source
    MineCoinbase { participant: usize },
    Generate { participant: usize, blocks: u64 },
    /// Split the matured funding source and persist the funding record
    Fund { participant: usize },
    Cycle {
        participant: usize,
        #[serde(default = "default_true")]
        mine: bool,
        #[serde(default = "default_count")]
        count: usize,
        /// Wait for equal tips after every cycle
        #[serde(default)]
        sync: bool,
    },
    /// Remember the participant's current height under `name`
    Mark { name: String, participant: usize },
    /// Remember every participant's chain view under `name`
    Snapshot { name: String },
    AssertDiverged { a: usize, b: usize },
    AssertHeight {
        participant: usize,
        #[serde(flatten)]
        expect: HeightExpect,
    },
    /// Every participant now holds the tip `participant` had in `snapshot`
    AssertConvergedTo { snapshot: String, participant: usize },
    /// `participant` still holds the tip it had in `snapshot`
    AssertUnchanged { snapshot: String, participant: usize },
    AssertFundingAnchored { participant: usize },
    /// Invalidate, on every participant, the block `participant` has at
    /// `mark + offset`
    Rollback {
        participant: usize,
        mark: String,
        #[serde(default)]
        offset: i64,
    },
}

impl Step {
    pub fn action(&self) -> &'static str {
        match self {
            Step::Join { .. } => "join",
            Step::Partition { .. } => "partition",
            Step::Sync { .. } => "sync",
            Step::SyncMempools => "sync_mempools",
            Step::MineCoinbase { .. } => "mine_coinbase",
            Step::Generate { .. } => "generate",
            Step::Fund { .. } => "fund",
            Step::Cycle { .. } => "cycle",
            Step::Mark { .. } => "mark",
            Step::Snapshot { .. } => "snapshot",
            Step::AssertDiverged { .. } => "assert_diverged",
            Step::AssertHeight { .. } => "assert_height",
            Step::AssertConvergedTo { .. } => "assert_converged_to",
            Step::AssertUnchanged { .. } => "assert_unchanged",
            Step::AssertFundingAnchored { .. } => "assert_funding_anchored",
            Step::Rollback { .. } => "rollback",
        }
    }

    fn participants(&self) -> Vec<usize> {
        match self {
            Step::Join { a, b } | Step::Partition { a, b } | Step::AssertDiverged { a, b } => {
                vec![*a, *b]
            }
            Step::MineCoinbase { participant }
            | Step::Generate { participant, .. }
            | Step::Fund { participant }
            | Step::Cycle { participant, .. }
            | Step::Mark { participant, .. }
            | Step::AssertHeight { participant, .. }
            | Step::AssertConvergedTo { participant, .. }
            | Step::AssertUnchanged { participant, .. }
            | Step::AssertFundingAnchored { participant }
            | Step::Rollback { participant, .. } => vec![*participant],
            Step::Sync { .. } | Step::SyncMempools | Step::Snapshot { .. } => Vec::new(),
        }
    }
}

/// Parse and validate a scenario plan
pub fn parse_scenario(yaml: &str) -> Result<ReorgScenario> {
    let scenario: ReorgScenario =
        serde_yaml::from_str(yaml).context("Failed to parse scenario YAML")?;
    validate(&scenario)?;
    Ok(scenario)
}

fn validate(scenario: &ReorgScenario) -> Result<()> {
    if scenario.name.trim().is_empty() {
        bail!("Scenario name must not be empty");
    }
    if scenario.participants == 0 {
        bail!("Scenario needs at least one participant");
    }
    if scenario.steps.is_empty() {
        bail!("Scenario has no steps");
    }

    let mut marks = HashSet::new();
    let mut snapshots = HashSet::new();
    for (idx, step) in scenario.steps.iter().enumerate() {
        let number = idx + 1;
        for participant in step.participants() {
            if participant >= scenario.participants {
                bail!(
                    "Step {} ({}): participant {} out of range (scenario has {})",
                    number,
                    step.action(),
                    participant,
                    scenario.participants
                );
            }
        }

        match step {
            Step::Join { a, b } | Step::Partition { a, b } | Step::AssertDiverged { a, b }
                if a == b =>
            {
                bail!("Step {} ({}): a and b must differ", number, step.action());
            }
            Step::Generate { blocks: 0, .. } => {
                bail!("Step {} (generate): blocks must be positive", number);
            }
            Step::Cycle { count: 0, .. } => {
                bail!("Step {} (cycle): count must be positive", number);
            }
            Step::Mark { name, .. } => {
                marks.insert(name.clone());
            }
            Step::Snapshot { name } => {
                snapshots.insert(name.clone());
            }
            Step::AssertHeight { expect, .. } => {
                if let Some(mark) = expect.height().mark() {
                    if !marks.contains(mark) {
                        bail!("Step {} (assert_height): unknown mark '{}'", number, mark);
                    }
                }
            }
            Step::AssertConvergedTo { snapshot, .. } | Step::AssertUnchanged { snapshot, .. } => {
                if !snapshots.contains(snapshot) {
                    bail!(
                        "Step {} ({}): unknown snapshot '{}'",
                        number,
                        step.action(),
                        snapshot
                    );
                }
            }
            Step::Rollback { mark, .. } => {
                if !marks.contains(mark) {
                    bail!("Step {} (rollback): unknown mark '{}'", number, mark);
                }
            }
            _ => {}
        }
    }
    Ok(())
}
