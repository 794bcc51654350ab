//! # Built-in Algorithms
//!
//! A small library of integer algorithms so a menu can be exercised from the
//! command line without a host application.
//!
//! Extractors flatten the payload values of their primary inputs:
//! - `sum`: saturating sum
//! - `max`: largest value (fails the chain when there is none)
//! - `count`: number of values
//! - `scale`: every value multiplied by `param`
//! - `sleep`: sleeps `param` milliseconds, then behaves like `sum`
//!
//! Deciders:
//! - `threshold`: first value is at least `param`
//! - `at_least`: payload carries at least `param` values

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use steer_core::{
    Algorithm, AlgorithmInputs, AlgorithmRegistry, Binding, Capability, Decider, ErrorSignal,
    FeatureNode, Payload, Reason, ResourceId, RoiKey,
};
use tracing::debug;

/// Which built-in to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinKind {
    Sum,
    Max,
    Count,
    Scale,
    Sleep,
    Threshold,
    AtLeast,
}

impl BuiltinKind {
    /// Capability the built-in registers with.
    #[must_use]
    pub fn capability(self) -> Capability {
        match self {
            BuiltinKind::Threshold | BuiltinKind::AtLeast => Capability::Decider,
            _ => Capability::Extractor,
        }
    }
}

/// One `[[algorithms]]` entry of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmSpec {
    pub name: String,
    pub kind: BuiltinKind,
    #[serde(default)]
    pub param: i64,
    /// Request one external resource per roi before running.
    #[serde(default)]
    pub reads: bool,
}

// =============================================================================
// EXTRACTORS
// =============================================================================

struct Extractor {
    kind: BuiltinKind,
    param: i64,
    reads: bool,
}

impl Extractor {
    fn sum(values: &[i64]) -> i64 {
        values.iter().fold(0i64, |acc, v| acc.saturating_add(*v))
    }
}

impl Algorithm for Extractor {
    fn execute(&self, inputs: &AlgorithmInputs<'_>) -> Result<Payload, ErrorSignal> {
        let values: Vec<i64> = inputs
            .primary
            .iter()
            .flat_map(|node| node.payload.values().iter().copied())
            .collect();

        match self.kind {
            BuiltinKind::Max => values
                .iter()
                .max()
                .map(|max| Payload::scalar(*max))
                .ok_or(ErrorSignal::abort_chain(Reason::AlgorithmFailure)),
            BuiltinKind::Count => Ok(Payload::scalar(values.len() as i64)),
            BuiltinKind::Scale => Ok(Payload::new(
                values
                    .iter()
                    .map(|v| v.saturating_mul(self.param))
                    .collect(),
            )),
            BuiltinKind::Sleep => {
                let millis = u64::try_from(self.param).unwrap_or(0);
                debug!(millis, roi = inputs.roi.0, "sleep algorithm");
                std::thread::sleep(Duration::from_millis(millis));
                Ok(Payload::scalar(Self::sum(&values)))
            }
            _ => Ok(Payload::scalar(Self::sum(&values))),
        }
    }

    fn resources(&self, roi: RoiKey) -> Vec<ResourceId> {
        if self.reads {
            vec![ResourceId(roi.0)]
        } else {
            Vec::new()
        }
    }
}

// =============================================================================
// DECIDERS
// =============================================================================

struct Cut {
    kind: BuiltinKind,
    param: i64,
}

impl Decider for Cut {
    fn decide(&self, node: &FeatureNode) -> Result<bool, ErrorSignal> {
        match self.kind {
            BuiltinKind::AtLeast => Ok(node.payload.values().len() as i64 >= self.param),
            _ => node
                .payload
                .first()
                .map(|first| first >= self.param)
                .ok_or(ErrorSignal::abort_chain(Reason::DecisionFailure)),
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Bind every configured built-in into a registry.
pub fn build_registry(specs: &[AlgorithmSpec]) -> Result<AlgorithmRegistry, ConfigError> {
    let mut registry = AlgorithmRegistry::new();
    for spec in specs {
        if registry.get(&spec.name).is_some() {
            return Err(ConfigError::DuplicateAlgorithm(spec.name.clone()));
        }
        let binding = match spec.kind.capability() {
            Capability::Extractor => Binding::Extractor(Arc::new(Extractor {
                kind: spec.kind,
                param: spec.param,
                reads: spec.reads,
            })),
            Capability::Decider => Binding::Decider(Arc::new(Cut {
                kind: spec.kind,
                param: spec.param,
            })),
        };
        registry.register(spec.name.clone(), binding);
    }
    Ok(registry)
}

// =============================================================================
// TESTS
// =============================================================================
