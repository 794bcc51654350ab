//! # Core Type Definitions
//!
//! This module contains the identifiers and value types shared by every part
//! of the steering engine:
//! - Identifiers (`ChainId`, `FeatureType`, `RoiKey`, `ResourceId`, `LumiBlock`)
//! - Event representation (`Event`, `EventIdentity`)
//! - Opaque algorithm output (`Payload`)
//! - Configuration-time error type (`SteerError`)
//!
//! ## Determinism Guarantees
//!
//! All identifier types:
//! - Use integer or string keys only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`

use crate::feature::FeatureNode;
use crate::signal::ErrorSignal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identity of a chain, taken from the menu's chain counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainId(pub u32);

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chain#{}", self.0)
    }
}

/// Name of a kind of intermediate result ("EMCluster", "Track", ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureType(pub String);

impl FeatureType {
    /// Create a new feature type from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the feature type as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FeatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Region-of-interest key scoping where a feature was computed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct RoiKey(pub u64);

impl RoiKey {
    /// Key used by unseeded, whole-event computations.
    pub const FULL_SCAN: RoiKey = RoiKey(u64::MAX);
}

/// Identifier of an externally fetched resource (a readout fragment, a
/// conditions payload, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u64);

/// Luminosity block number. Prescale decisions are keyed by it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct LumiBlock(pub u32);

// =============================================================================
// PAYLOAD
// =============================================================================

/// Opaque output of an algorithm.
///
/// Quantities are carried as integers (energies in MeV, counts, flags) so the
/// engine never performs floating-point arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub Vec<i64>);

impl Payload {
    /// Create a payload from raw values.
    #[must_use]
    pub fn new(values: Vec<i64>) -> Self {
        Self(values)
    }

    /// Create a payload holding one value.
    #[must_use]
    pub fn scalar(value: i64) -> Self {
        Self(vec![value])
    }

    /// Borrow the raw values.
    #[must_use]
    pub fn values(&self) -> &[i64] {
        &self.0
    }

    /// First value, if any.
    #[must_use]
    pub fn first(&self) -> Option<i64> {
        self.0.first().copied()
    }

    /// Saturating sum of all values.
    #[must_use]
    pub fn sum(&self) -> i64 {
        self.0.iter().fold(0i64, |acc, v| acc.saturating_add(*v))
    }

    /// Largest value, if any.
    #[must_use]
    pub fn max(&self) -> Option<i64> {
        self.0.iter().copied().max()
    }
}

// =============================================================================
// EVENT
// =============================================================================

/// Identity of one event within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventIdentity {
    pub run: u32,
    pub lumi_block: LumiBlock,
    pub number: u64,
}

/// One event handed to the engine.
///
/// `seeds` is the upstream decision output the activation collaborator turns
/// into active chains and seed features. An event whose identity could not be
/// established is still processed far enough to produce an aborted record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub identity: Option<EventIdentity>,
    #[serde(default)]
    pub seeds: Vec<FeatureNode>,
}

impl Event {
    /// Create an event with identity and seeds.
    #[must_use]
    pub fn new(identity: EventIdentity, seeds: Vec<FeatureNode>) -> Self {
        Self {
            identity: Some(identity),
            seeds,
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised while building or driving the engine.
///
/// Per-event failures are never `SteerError`s; they travel as
/// [`ErrorSignal`] values. Every variant here is either a configuration
/// problem detected by `configure()` or the job-level abort surfacing out of
/// the top-level event loop.
#[derive(Debug, Error)]
pub enum SteerError {
    /// Sequences depend on each other in a loop.
    #[error("cyclic sequence dependency: {}", format_cycle(.0))]
    CyclicSequence(Vec<FeatureType>),

    /// A sequence or step names an algorithm the registry does not provide.
    #[error("unresolved algorithm binding '{0}'")]
    UnresolvedBinding(String),

    /// A binding exists but has the wrong capability for where it is used.
    #[error("algorithm '{name}' is registered as {found:?}, expected {expected:?}")]
    CapabilityMismatch {
        name: String,
        expected: crate::algorithm::Capability,
        found: crate::algorithm::Capability,
    },

    /// A feature type is neither produced by a sequence nor a declared seed.
    #[error("no sequence produces feature type '{0}' and it is not a seed type")]
    UnknownType(FeatureType),

    /// Two sequences claim the same output type.
    #[error("feature type '{0}' is produced by more than one sequence")]
    DuplicateProducer(FeatureType),

    /// Two chains share a name or counter.
    #[error("duplicate chain '{0}'")]
    DuplicateChain(String),

    /// A group references a chain the menu does not define.
    #[error("unknown chain '{0}'")]
    UnknownChain(String),

    /// A coherent prescaling group is malformed.
    #[error("invalid coherent prescale group '{group}': {reason}")]
    InvalidGroup { group: String, reason: String },

    /// Any other structural problem with the menu.
    #[error("invalid menu: {0}")]
    InvalidMenu(String),

    /// An event escalated to job level; processing must stop.
    #[error("job aborted: {0}")]
    JobAborted(ErrorSignal),
}

fn format_cycle(path: &[FeatureType]) -> String {
    path.iter()
        .map(FeatureType::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

// =============================================================================
// TESTS
// =============================================================================
