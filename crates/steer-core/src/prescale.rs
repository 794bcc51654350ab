//! # Prescaling
//!
//! Statistical down-sampling of chain acceptance.
//!
//! The engine asks a [`Scaler`] once per event for every chain it activates,
//! keyed by chain identity and lumi-block. Chains in a coherent prescaling
//! group never ask for themselves: the group's master is asked once and its
//! answer is copied to every member, so correlated selections are prescaled
//! in lockstep.

use crate::menu::Menu;
use crate::types::{ChainId, LumiBlock, SteerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// DECISION
// =============================================================================

/// Answer of a scaler for one chain and event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrescaleDecision {
    /// The chain runs in the first pass.
    pub accept: bool,
    /// The chain was skipped by prescaling (and may be rerun). When both
    /// flags are false the chain is disabled for this event.
    pub was_prescaled: bool,
}

impl PrescaleDecision {
    pub const ACCEPT: PrescaleDecision = PrescaleDecision {
        accept: true,
        was_prescaled: false,
    };

    pub const PRESCALED: PrescaleDecision = PrescaleDecision {
        accept: false,
        was_prescaled: true,
    };

    pub const DISABLED: PrescaleDecision = PrescaleDecision {
        accept: false,
        was_prescaled: false,
    };
}

/// Source of prescale decisions.
pub trait Scaler {
    /// Decide for `chain` in `lumi_block`.
    fn decide(&mut self, chain: ChainId, lumi_block: LumiBlock) -> PrescaleDecision;
}

// =============================================================================
// COUNTER SCALER
// =============================================================================

/// Deterministic integer-only scaler.
///
/// A factor of 0 disables a chain, 1 accepts every event and N accepts about
/// one event in N. Each decision mixes the seed, chain, lumi-block and a
/// per-chain call counter, so a given seed always replays the same sequence.
#[derive(Debug, Clone, Default)]
pub struct CounterScaler {
    seed: u64,
    factors: BTreeMap<ChainId, u32>,
    calls: BTreeMap<ChainId, u64>,
}

impl CounterScaler {
    /// Scaler with no factors; unknown chains are accepted.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// Scaler with the factors configured in `menu`.
    #[must_use]
    pub fn from_menu(menu: &Menu, seed: u64) -> Self {
        let mut scaler = Self::new(seed);
        for chain in &menu.chains {
            scaler.set_factor(ChainId(chain.counter), chain.prescale);
        }
        scaler
    }

    /// Set the factor of one chain.
    pub fn set_factor(&mut self, chain: ChainId, factor: u32) {
        self.factors.insert(chain, factor);
    }

    /// Configured factor of a chain (1 when unknown).
    #[must_use]
    pub fn factor(&self, chain: ChainId) -> u32 {
        self.factors.get(&chain).copied().unwrap_or(1)
    }
}

impl Scaler for CounterScaler {
    fn decide(&mut self, chain: ChainId, lumi_block: LumiBlock) -> PrescaleDecision {
        let factor = self.factor(chain);
        match factor {
            0 => PrescaleDecision::DISABLED,
            1 => PrescaleDecision::ACCEPT,
            n => {
                let count = self.calls.entry(chain).or_insert(0);
                *count = count.wrapping_add(1);
                let key = self.seed
                    ^ (u64::from(chain.0) << 32)
                    ^ u64::from(lumi_block.0)
                    ^ count.rotate_left(17);
                if mix(key) % u64::from(n) == 0 {
                    PrescaleDecision::ACCEPT
                } else {
                    PrescaleDecision::PRESCALED
                }
            }
        }
    }
}

/// splitmix64 finalizer.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

// =============================================================================
// COHERENT GROUPS
// =============================================================================

/// Member-to-master map of coherent prescaling groups.
#[derive(Debug, Clone, Default)]
pub struct CoherentGroups {
    master_of: BTreeMap<ChainId, ChainId>,
}

impl CoherentGroups {
    /// Build the map from a validated menu.
    pub fn from_menu(menu: &Menu) -> Result<Self, SteerError> {
        let ids: BTreeMap<&str, ChainId> = menu
            .chains
            .iter()
            .map(|c| (c.name.as_str(), ChainId(c.counter)))
            .collect();
        let lookup = |name: &str| {
            ids.get(name)
                .copied()
                .ok_or_else(|| SteerError::UnknownChain(name.to_string()))
        };

        let mut master_of = BTreeMap::new();
        for group in &menu.groups {
            let master = lookup(&group.master)?;
            for member in &group.members {
                master_of.insert(lookup(member)?, master);
            }
        }
        Ok(Self { master_of })
    }

    /// Chain whose decision `chain` follows.
    #[must_use]
    pub fn master(&self, chain: ChainId) -> ChainId {
        self.master_of.get(&chain).copied().unwrap_or(chain)
    }

    /// Decide for every chain in `chains`, consulting each master at most
    /// once.
    pub fn decide_all(
        &self,
        chains: &[ChainId],
        lumi_block: LumiBlock,
        scaler: &mut dyn Scaler,
    ) -> BTreeMap<ChainId, PrescaleDecision> {
        let mut by_master: BTreeMap<ChainId, PrescaleDecision> = BTreeMap::new();
        chains
            .iter()
            .map(|&chain| {
                let master = self.master(chain);
                let decision = *by_master
                    .entry(master)
                    .or_insert_with(|| scaler.decide(master, lumi_block));
                (chain, decision)
            })
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
