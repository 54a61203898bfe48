// File: testing-framework/src/orchestrator/mod.rs
//
// Orchestrator Module
//
// Deterministic infrastructure shared by every component: the injected clock
// and the key seed sequence.

/// Clock abstractions for deterministic time control
pub mod clock;
/// Disjoint seed ranges for key derivation
pub mod seed;

pub use clock::{Clock, PausedClock, SystemClock};
pub use seed::{seed_bytes, SeedSequence};
