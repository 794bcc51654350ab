//! # Algorithms
//!
//! Pluggable capabilities the engine schedules, and the configuration-time
//! wrapper that binds one of them into a sequence.
//!
//! Algorithms come in two tagged kinds, fixed when they are registered:
//! - [`Capability::Extractor`]: turns input features into a new feature.
//! - [`Capability::Decider`]: passes or rejects one feature for a chain step.
//!
//! The tag is checked once in `configure()`; nothing inspects types at run
//! time.

use crate::feature::FeatureNode;
use crate::signal::ErrorSignal;
use crate::types::{FeatureType, Payload, ResourceId, RoiKey, SteerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// CAPABILITY TRAITS
// =============================================================================

/// Inputs handed to an extractor for one `(output type, roi)` production.
#[derive(Debug)]
pub struct AlgorithmInputs<'a> {
    /// Region the output is produced for.
    pub roi: RoiKey,
    /// Primary data dependencies, in declared order.
    pub primary: Vec<&'a FeatureNode>,
    /// Optional side input used to prime the algorithm (ordering hints,
    /// decision context). It is not a data dependency of the output.
    pub seed: Option<&'a FeatureNode>,
}

/// A feature-extraction algorithm.
///
/// Must be a pure function of its inputs: idempotent, no hidden state carried
/// between calls within one event.
pub trait Algorithm: Send + Sync {
    /// Produce the output payload from resolved inputs.
    fn execute(&self, inputs: &AlgorithmInputs<'_>) -> Result<Payload, ErrorSignal>;

    /// External resources this algorithm will read when run at `roi`.
    fn resources(&self, _roi: RoiKey) -> Vec<ResourceId> {
        Vec::new()
    }
}

/// A pass/reject decision function for a chain step.
pub trait Decider: Send + Sync {
    /// Decide whether `node` satisfies the step.
    fn decide(&self, node: &FeatureNode) -> Result<bool, ErrorSignal>;
}

/// Kind of a registered algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    Extractor,
    Decider,
}

/// A registered algorithm with its capability tag.
#[derive(Clone)]
pub enum Binding {
    Extractor(Arc<dyn Algorithm>),
    Decider(Arc<dyn Decider>),
}

impl Binding {
    /// The capability tag of this binding.
    #[must_use]
    pub fn capability(&self) -> Capability {
        match self {
            Binding::Extractor(_) => Capability::Extractor,
            Binding::Decider(_) => Capability::Decider,
        }
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Binding").field(&self.capability()).finish()
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Named algorithm bindings available to a menu.
#[derive(Debug, Clone, Default)]
pub struct AlgorithmRegistry {
    bindings: BTreeMap<String, Binding>,
}

impl AlgorithmRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extractor under `name`, replacing any earlier binding.
    pub fn register_extractor(
        &mut self,
        name: impl Into<String>,
        algorithm: impl Algorithm + 'static,
    ) -> &mut Self {
        self.bindings
            .insert(name.into(), Binding::Extractor(Arc::new(algorithm)));
        self
    }

    /// Register a decider under `name`, replacing any earlier binding.
    pub fn register_decider(
        &mut self,
        name: impl Into<String>,
        decider: impl Decider + 'static,
    ) -> &mut Self {
        self.bindings
            .insert(name.into(), Binding::Decider(Arc::new(decider)));
        self
    }

    /// Register an already shared binding.
    pub fn register(&mut self, name: impl Into<String>, binding: Binding) -> &mut Self {
        self.bindings.insert(name.into(), binding);
        self
    }

    /// Look up a binding.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// Number of registered bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Resolve `name` to an extractor.
    pub fn extractor(&self, name: &str) -> Result<Arc<dyn Algorithm>, SteerError> {
        match self.bindings.get(name) {
            Some(Binding::Extractor(algorithm)) => Ok(Arc::clone(algorithm)),
            Some(other) => Err(SteerError::CapabilityMismatch {
                name: name.to_string(),
                expected: Capability::Extractor,
                found: other.capability(),
            }),
            None => Err(SteerError::UnresolvedBinding(name.to_string())),
        }
    }

    /// Resolve `name` to a decider.
    pub fn decider(&self, name: &str) -> Result<Arc<dyn Decider>, SteerError> {
        match self.bindings.get(name) {
            Some(Binding::Decider(decider)) => Ok(Arc::clone(decider)),
            Some(other) => Err(SteerError::CapabilityMismatch {
                name: name.to_string(),
                expected: Capability::Decider,
                found: other.capability(),
            }),
            None => Err(SteerError::UnresolvedBinding(name.to_string())),
        }
    }
}

// =============================================================================
// ALGORITHM STEP
// =============================================================================

/// One extractor bound into the menu with its type contract.
///
/// Built once by `configure()` and kept for the lifetime of the engine.
pub struct AlgorithmStep {
    /// Binding name of the algorithm.
    pub name: String,
    /// Type this step produces.
    pub output: FeatureType,
    /// Primary input types, resolved at the same roi as the output.
    pub inputs: Vec<FeatureType>,
    /// Optional side seed input.
    pub seed: Option<FeatureType>,
    algorithm: Arc<dyn Algorithm>,
    invocations: u64,
}

impl AlgorithmStep {
    /// Bind an algorithm to its type contract.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        output: FeatureType,
        inputs: Vec<FeatureType>,
        seed: Option<FeatureType>,
        algorithm: Arc<dyn Algorithm>,
    ) -> Self {
        Self {
            name: name.into(),
            output,
            inputs,
            seed,
            algorithm,
            invocations: 0,
        }
    }

    /// Run the algorithm, counting the invocation.
    pub fn invoke(&mut self, inputs: &AlgorithmInputs<'_>) -> Result<Payload, ErrorSignal> {
        self.invocations = self.invocations.saturating_add(1);
        self.algorithm.execute(inputs)
    }

    /// Resources the algorithm reads at `roi`.
    #[must_use]
    pub fn resources(&self, roi: RoiKey) -> Vec<ResourceId> {
        self.algorithm.resources(roi)
    }

    /// Number of times the algorithm has actually run.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        self.invocations
    }
}

impl std::fmt::Debug for AlgorithmStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmStep")
            .field("name", &self.name)
            .field("output", &self.output)
            .field("inputs", &self.inputs)
            .field("seed", &self.seed)
            .field("invocations", &self.invocations)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
