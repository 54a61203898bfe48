// File: testing-framework/src/keys.rs
//
// Key Material Provisioning
//
// Each participant gets one key pair per role. Seeds come from a shared
// `SeedSequence`, so key material is never reused within a run.

use crate::orchestrator::{seed_bytes, SeedSequence};
use log::debug;
use minerid_common::crypto::{CryptoError, KeyPair};
use std::sync::Arc;
use strum::{EnumCount, EnumIter, IntoEnumIterator};

/// Named purpose of a participant key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum KeyRole {
    MinerId,
    Revocation,
    PrevMinerId,
    PrevRevocation,
    CompromisedMinerId,
    Funding,
}

/// The six keys of one participant, fixed for the whole run
#[derive(Debug, Clone)]
pub struct ParticipantKeySet {
    pub miner_id: KeyPair,
    pub revocation: KeyPair,
    pub prev_miner_id: KeyPair,
    pub prev_revocation: KeyPair,
    pub compromised_miner_id: KeyPair,
    pub funding: KeyPair,
    /// Seed used for each role, in `KeyRole` order
    pub seeds: Vec<(KeyRole, u64)>,
}

impl ParticipantKeySet {
    pub fn key(&self, role: KeyRole) -> &KeyPair {
        match role {
            KeyRole::MinerId => &self.miner_id,
            KeyRole::Revocation => &self.revocation,
            KeyRole::PrevMinerId => &self.prev_miner_id,
            KeyRole::PrevRevocation => &self.prev_revocation,
            KeyRole::CompromisedMinerId => &self.compromised_miner_id,
            KeyRole::Funding => &self.funding,
        }
    }

    pub fn seed(&self, role: KeyRole) -> Option<u64> {
        self.seeds
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, seed)| *seed)
    }
}

pub struct KeyMaterialProvisioner {
    seeds: Arc<SeedSequence>,
}

impl KeyMaterialProvisioner {
    pub fn new(seeds: Arc<SeedSequence>) -> Self {
        Self { seeds }
    }

    /// Derive a fresh key set for participant `index`
    pub fn provision(&self, index: usize) -> Result<ParticipantKeySet, CryptoError> {
        let first = self.seeds.reserve(KeyRole::COUNT as u64);
        let mut keys = Vec::with_capacity(KeyRole::COUNT);
        let mut seeds = Vec::with_capacity(KeyRole::COUNT);
        for (offset, role) in KeyRole::iter().enumerate() {
            let seed = first + offset as u64;
            keys.push(KeyPair::from_seed(&seed_bytes(seed))?);
            seeds.push((role, seed));
        }
        debug!(
            "participant {} keys from seeds {}..{}",
            index,
            first,
            first + KeyRole::COUNT as u64
        );

        let mut keys = keys.into_iter();
        let mut next = || keys.next().ok_or(CryptoError::InvalidSeed);
        Ok(ParticipantKeySet {
            miner_id: next()?,
            revocation: next()?,
            prev_miner_id: next()?,
            prev_revocation: next()?,
            compromised_miner_id: next()?,
            funding: next()?,
            seeds,
        })
    }
}
