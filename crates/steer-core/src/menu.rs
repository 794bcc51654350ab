//! # Menu
//!
//! Plain configuration struct describing chains, sequences and prescale
//! groups. The engine never parses a menu format itself: callers build a
//! [`Menu`] in code or deserialize one with serde (the app reads TOML).
//!
//! Structural checks that need no algorithm bindings live in
//! [`Menu::validate`]; everything else (type resolution, cycles, bindings)
//! is checked by `SteeringEngine::configure`.

use crate::primitives::{DEFAULT_MULTIPLICITY, DEFAULT_PRESCALE};
use crate::types::{FeatureType, SteerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

fn default_prescale() -> u32 {
    DEFAULT_PRESCALE
}

fn default_rerun() -> bool {
    true
}

fn default_multiplicity() -> usize {
    DEFAULT_MULTIPLICITY
}

/// How a feature type is produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceDef {
    pub output: FeatureType,
    pub algorithm: String,
    #[serde(default)]
    pub inputs: Vec<FeatureType>,
    #[serde(default)]
    pub seed: Option<FeatureType>,
}

impl SequenceDef {
    /// Sequence producing `output` with `algorithm` from `inputs`.
    #[must_use]
    pub fn new(output: &str, algorithm: &str, inputs: &[&str]) -> Self {
        Self {
            output: FeatureType::new(output),
            algorithm: algorithm.to_string(),
            inputs: inputs.iter().map(|t| FeatureType::new(*t)).collect(),
            seed: None,
        }
    }

    /// Attach a side seed input.
    #[must_use]
    pub fn with_seed(mut self, seed: &str) -> Self {
        self.seed = Some(FeatureType::new(seed));
        self
    }
}

/// One step of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDef {
    pub output: FeatureType,
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default = "default_multiplicity")]
    pub multiplicity: usize,
}

impl StepDef {
    /// Step requiring `output`, optionally judged by `decision`.
    #[must_use]
    pub fn new(output: &str, decision: Option<&str>) -> Self {
        Self {
            output: FeatureType::new(output),
            decision: decision.map(str::to_string),
            multiplicity: DEFAULT_MULTIPLICITY,
        }
    }

    /// Require at least `n` surviving rois.
    #[must_use]
    pub fn with_multiplicity(mut self, n: usize) -> Self {
        self.multiplicity = n;
        self
    }
}

/// One chain of the menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDef {
    pub name: String,
    pub counter: u32,
    /// Seed type whose rois activate the chain. `None` runs the chain once per
    /// event at `RoiKey::FULL_SCAN`.
    #[serde(default)]
    pub seed: Option<FeatureType>,
    #[serde(default)]
    pub priority: i32,
    /// 0 disables the chain, 1 keeps every event, N keeps one in N.
    #[serde(default = "default_prescale")]
    pub prescale: u32,
    #[serde(default = "default_rerun")]
    pub rerun: bool,
    #[serde(default)]
    pub steps: Vec<StepDef>,
}

impl ChainDef {
    /// Chain with no steps yet.
    #[must_use]
    pub fn new(name: &str, counter: u32, seed: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            counter,
            seed: seed.map(FeatureType::new),
            priority: 0,
            prescale: DEFAULT_PRESCALE,
            rerun: true,
            steps: Vec::new(),
        }
    }

    /// Append a step.
    #[must_use]
    pub fn step(mut self, step: StepDef) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the prescale factor.
    #[must_use]
    pub fn with_prescale(mut self, prescale: u32) -> Self {
        self.prescale = prescale;
        self
    }

    /// Set the static ordering priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Allow or forbid resurrection in the rerun pass.
    #[must_use]
    pub fn with_rerun(mut self, rerun: bool) -> Self {
        self.rerun = rerun;
        self
    }
}

/// Chains whose prescale decision follows one master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDef {
    pub name: String,
    pub master: String,
    pub members: Vec<String>,
}

/// The complete menu.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Menu {
    #[serde(default)]
    pub seed_types: Vec<FeatureType>,
    #[serde(default)]
    pub sequences: Vec<SequenceDef>,
    #[serde(default)]
    pub chains: Vec<ChainDef>,
    #[serde(default)]
    pub groups: Vec<GroupDef>,
}

impl Menu {
    /// Create an empty menu.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a type provided by activation.
    #[must_use]
    pub fn seed_type(mut self, ty: &str) -> Self {
        self.seed_types.push(FeatureType::new(ty));
        self
    }

    /// Add a sequence.
    #[must_use]
    pub fn sequence(mut self, def: SequenceDef) -> Self {
        self.sequences.push(def);
        self
    }

    /// Add a chain.
    #[must_use]
    pub fn chain(mut self, def: ChainDef) -> Self {
        self.chains.push(def);
        self
    }

    /// Add a coherent prescale group.
    #[must_use]
    pub fn group(mut self, name: &str, master: &str, members: &[&str]) -> Self {
        self.groups.push(GroupDef {
            name: name.to_string(),
            master: master.to_string(),
            members: members.iter().map(|m| (*m).to_string()).collect(),
        });
        self
    }

    /// Check menu structure that needs no algorithm bindings.
    pub fn validate(&self) -> Result<(), SteerError> {
        let mut names = BTreeSet::new();
        let mut counters = BTreeSet::new();
        for chain in &self.chains {
            if !names.insert(chain.name.as_str()) {
                return Err(SteerError::DuplicateChain(chain.name.clone()));
            }
            if !counters.insert(chain.counter) {
                return Err(SteerError::DuplicateChain(format!(
                    "{} (counter {})",
                    chain.name, chain.counter
                )));
            }
            if chain.steps.is_empty() {
                return Err(SteerError::InvalidMenu(format!(
                    "chain '{}' has no steps",
                    chain.name
                )));
            }
            if let Some(step) = chain.steps.iter().find(|s| s.multiplicity == 0) {
                return Err(SteerError::InvalidMenu(format!(
                    "chain '{}' step '{}' has multiplicity 0",
                    chain.name, step.output
                )));
            }
        }

        let mut grouped = BTreeSet::new();
        for group in &self.groups {
            for name in group.members.iter().chain(std::iter::once(&group.master)) {
                if !names.contains(name.as_str()) {
                    return Err(SteerError::UnknownChain(name.clone()));
                }
            }
            if !group.members.contains(&group.master) {
                return Err(SteerError::InvalidGroup {
                    group: group.name.clone(),
                    reason: format!("master '{}' is not a member", group.master),
                });
            }
            for member in &group.members {
                if !grouped.insert(member.as_str()) {
                    return Err(SteerError::InvalidGroup {
                        group: group.name.clone(),
                        reason: format!("chain '{}' belongs to more than one group", member),
                    });
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
