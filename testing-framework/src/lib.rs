//! # MinerID Reorg Harness
//!
//! Deterministic orchestration of miner identity attestations across chain
//! forks, reconnects and manual rollbacks.
//!
//! ## Architecture Overview
//!
//! - **node**: the `NodeRpc` contract, a JSON-RPC adapter for real nodes and
//!   polling barriers over either backend
//! - **sim**: an in-process network of simulated nodes implementing the same
//!   contract on paused tokio time
//! - **keys / funding / cycle**: per-participant key material, the funding
//!   lineage and the identity transaction cycle
//! - **topology**: joins, partitions, convergence barriers and rollbacks
//! - **invariants**: post-conditions closing every phase
//! - **scenarios**: YAML plans and the executor running them
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use minerid_testing_framework::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_default_scenario() {
//!     let root = create_temp_datadir().unwrap();
//!     let network = SimNetwork::builder()
//!         .with_datadir_root(root.path())
//!         .build()
//!         .unwrap();
//!     let mut executor = ScenarioExecutor::from_sim(
//!         HarnessConfig::default(),
//!         Arc::new(PausedClock::new()),
//!         &network,
//!     )
//!     .unwrap();
//!
//!     let report = executor.execute(&default_scenario().unwrap()).await.unwrap();
//!     assert!(report.success);
//! }
//! ```
//!
//! ## Design Principles
//!
//! 1. **Barriers, not sleeps**: every wait polls an observable predicate
//! 2. **Fail fast**: the first violated contract stops the run with the
//!    phase and every participant's chain view
//! 3. **Deterministic**: injected clock and disjoint key seed ranges

#![warn(clippy::all)]

/// Harness configuration
pub mod config;

/// Identity transaction cycle and candidate blocks
pub mod cycle;

pub mod error;

/// Funding lineage setup and persistence
pub mod funding;

// Post-condition checks
pub mod invariants;

/// Per-participant key material
pub mod keys;

/// Node contract, JSON-RPC adapter and barriers
pub mod node;

/// Clock and seed sequence
pub mod orchestrator;

pub mod participant;

// YAML scenario parser and executor
pub mod scenarios;

/// In-process simulated network
pub mod sim;

/// Peer topology control and convergence barriers
pub mod topology;

/// Funding storage, temporary directories and failure artifacts
pub mod utilities;

// Convenient re-exports for common usage
pub mod prelude;

pub use error::{ErrorKind, HarnessError, HarnessResult, Phase, ScenarioFailure};
pub use orchestrator::{Clock, PausedClock, SystemClock};

/// Harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
