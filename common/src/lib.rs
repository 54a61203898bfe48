#![allow(clippy::module_inception)]

//! Chain primitives for the miner identity reorg harness: hashing, key
//! derivation, the legacy transaction and block wire format, and the
//! miner-info attestation payload.

pub mod block;
pub mod config;
pub mod crypto;
pub mod miner_info;
pub mod script;
pub mod serializer;
pub mod transaction;
