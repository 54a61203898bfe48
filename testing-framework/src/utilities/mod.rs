// File: testing-framework/src/utilities/mod.rs
//
// Harness Utilities
//
// Funding-record storage, temporary data directories and failure artifacts.

/// Funding record files and temporary data directories
pub mod storage;

/// Failure artifact collection for diagnosing scenario failures
pub mod artifacts;

pub use artifacts::{ArtifactCollector, FundingSnapshot, ScenarioArtifact};
pub use storage::{create_temp_datadir, FundingStore, TempDataDir};
