//! # Sequence Resolver
//!
//! Maps every feature type to the algorithm steps that produce it.
//!
//! Resolution happens once, in [`SequenceResolver::build`]:
//! - every referenced type must be produced by exactly one sequence or be a
//!   declared seed type,
//! - every sequence algorithm must be bound as an extractor,
//! - cyclic dependencies are fatal.
//!
//! The resolved plans are kept for the lifetime of the engine. Only results
//! are per-event; they live in the [`FeatureGraph`].

use crate::algorithm::{AlgorithmInputs, AlgorithmRegistry, AlgorithmStep};
use crate::deadline::CancellationToken;
use crate::feature::{FeatureGraph, FeatureNode, SlotId};
use crate::menu::Menu;
use crate::signal::{Action, ErrorSignal, Reason};
use crate::types::{FeatureType, ResourceId, RoiKey, SteerError};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Producer {
    Seed,
    Step(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Configuration-time plan cache plus run-time production through the
/// feature graph.
#[derive(Debug, Default)]
pub struct SequenceResolver {
    steps: Vec<AlgorithmStep>,
    producers: BTreeMap<FeatureType, Producer>,
    /// For each produced type, the algorithm steps feeding it in dependency
    /// order (inputs before consumers, the producing step last).
    plans: BTreeMap<FeatureType, Vec<usize>>,
}

impl SequenceResolver {
    /// Resolve every sequence of `menu` against `registry`.
    pub fn build(menu: &Menu, registry: &AlgorithmRegistry) -> Result<Self, SteerError> {
        let mut resolver = Self::default();

        for seed in &menu.seed_types {
            resolver.producers.insert(seed.clone(), Producer::Seed);
        }

        for def in &menu.sequences {
            if resolver.producers.contains_key(&def.output) {
                return Err(SteerError::DuplicateProducer(def.output.clone()));
            }
            let algorithm = registry.extractor(&def.algorithm)?;
            let index = resolver.steps.len();
            resolver.steps.push(AlgorithmStep::new(
                def.algorithm.clone(),
                def.output.clone(),
                def.inputs.clone(),
                def.seed.clone(),
                algorithm,
            ));
            resolver
                .producers
                .insert(def.output.clone(), Producer::Step(index));
        }

        // Every type anybody asks for must have a producer.
        let referenced = menu
            .sequences
            .iter()
            .flat_map(|s| s.inputs.iter().chain(s.seed.iter()))
            .chain(menu.chains.iter().flat_map(|c| c.seed.iter()))
            .chain(
                menu.chains
                    .iter()
                    .flat_map(|c| c.steps.iter().map(|s| &s.output)),
            );
        for ty in referenced {
            if !resolver.producers.contains_key(ty) {
                return Err(SteerError::UnknownType(ty.clone()));
            }
        }

        let produced: Vec<FeatureType> = resolver
            .producers
            .iter()
            .filter(|(_, p)| matches!(p, Producer::Step(_)))
            .map(|(ty, _)| ty.clone())
            .collect();
        for ty in produced {
            let mut marks = BTreeMap::new();
            let mut stack = Vec::new();
            let mut order = Vec::new();
            resolver.visit(&ty, &mut marks, &mut stack, &mut order)?;
            resolver.plans.insert(ty, order);
        }

        Ok(resolver)
    }

    fn visit(
        &self,
        ty: &FeatureType,
        marks: &mut BTreeMap<FeatureType, Mark>,
        stack: &mut Vec<FeatureType>,
        order: &mut Vec<usize>,
    ) -> Result<(), SteerError> {
        match marks.get(ty) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|t| t == ty).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(ty.clone());
                return Err(SteerError::CyclicSequence(cycle));
            }
            None => {}
        }

        let Some(Producer::Step(index)) = self.producers.get(ty).copied() else {
            marks.insert(ty.clone(), Mark::Done);
            return Ok(());
        };

        marks.insert(ty.clone(), Mark::Visiting);
        stack.push(ty.clone());
        let step = &self.steps[index];
        for dep in step.inputs.iter().chain(step.seed.iter()) {
            self.visit(dep, marks, stack, order)?;
        }
        stack.pop();
        marks.insert(ty.clone(), Mark::Done);
        order.push(index);
        Ok(())
    }

    /// Algorithm steps feeding `ty`, dependencies first. Empty for seed types.
    #[must_use]
    pub fn plan(&self, ty: &FeatureType) -> &[usize] {
        self.plans.get(ty).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All bound algorithm steps.
    #[must_use]
    pub fn steps(&self) -> &[AlgorithmStep] {
        &self.steps
    }

    /// Total algorithm invocations across all steps.
    #[must_use]
    pub fn total_invocations(&self) -> u64 {
        self.steps
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.invocations()))
    }

    /// Resources needed to produce `ty` at `roi` that are not already
    /// covered by cached results.
    #[must_use]
    pub fn requirements(
        &self,
        ty: &FeatureType,
        roi: RoiKey,
        graph: &FeatureGraph,
    ) -> Vec<ResourceId> {
        if graph.contains(ty, roi) {
            return Vec::new();
        }
        self.plan(ty)
            .iter()
            .map(|&index| &self.steps[index])
            .filter(|step| !graph.contains(&step.output, roi))
            .flat_map(|step| step.resources(roi))
            .collect()
    }

    /// Produce `ty` at `roi`, running only what the graph has not cached.
    ///
    /// Failures are stored as tombstones escalated to at least `AbortChain`
    /// and are never retried within the event. When `cancel` is set after an
    /// invocation the job-level signal is returned without touching the graph.
    pub fn produce(
        &mut self,
        ty: &FeatureType,
        roi: RoiKey,
        graph: &mut FeatureGraph,
        cancel: &CancellationToken,
    ) -> Result<SlotId, ErrorSignal> {
        if let Some(found) = graph.lookup(ty, roi) {
            return found;
        }

        let index = match self.producers.get(ty).copied() {
            Some(Producer::Step(index)) => index,
            // Seeds are inserted before any production; absence is final.
            Some(Producer::Seed) | None => {
                return Err(graph.insert_failure(
                    ty.clone(),
                    roi,
                    ErrorSignal::abort_chain(Reason::MissingFeature),
                ));
            }
        };

        let input_count = self.steps[index].inputs.len();
        let mut primary = Vec::with_capacity(input_count);
        for position in 0..input_count {
            let input = self.steps[index].inputs[position].clone();
            match self.produce(&input, roi, graph, cancel) {
                Ok(id) => primary.push(id),
                Err(signal) => return Err(Self::propagate(ty, roi, graph, signal)),
            }
        }

        let seed = match self.steps[index].seed.clone() {
            Some(seed_type) => match self.produce(&seed_type, roi, graph, cancel) {
                Ok(id) => Some(id),
                Err(signal) => return Err(Self::propagate(ty, roi, graph, signal)),
            },
            None => None,
        };

        let result = {
            let inputs = AlgorithmInputs {
                roi,
                primary: primary.iter().filter_map(|id| graph.node(*id)).collect(),
                seed: seed.and_then(|id| graph.node(id)),
            };
            tracing::trace!(algorithm = %self.steps[index].name, output = %ty, roi = roi.0, "invoke");
            self.steps[index].invoke(&inputs)
        };

        if cancel.is_cancelled() {
            return Err(ErrorSignal::abort_job(Reason::HardTimeout));
        }

        match result {
            Ok(payload) => Ok(graph.insert(FeatureNode::new(ty.clone(), roi, payload))),
            Err(signal) => {
                tracing::debug!(
                    algorithm = %self.steps[index].name,
                    output = %ty,
                    roi = roi.0,
                    signal = %signal,
                    "algorithm failed"
                );
                Err(graph.insert_failure(
                    ty.clone(),
                    roi,
                    signal.escalate_to(Action::AbortChain),
                ))
            }
        }
    }

    fn propagate(
        ty: &FeatureType,
        roi: RoiKey,
        graph: &mut FeatureGraph,
        signal: ErrorSignal,
    ) -> ErrorSignal {
        if signal.action >= Action::AbortJob {
            return signal;
        }
        graph.insert_failure(ty.clone(), roi, signal.escalate_to(Action::AbortChain))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Algorithm;
    use crate::menu::SequenceDef;
    use crate::types::Payload;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sums its primary inputs and adds an offset; counts calls.
    struct Summer {
        offset: i64,
        calls: Arc<AtomicUsize>,
        reads: Vec<ResourceId>,
    }

    impl Algorithm for Summer {
        fn execute(&self, inputs: &AlgorithmInputs<'_>) -> Result<Payload, ErrorSignal> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let total = inputs
                .primary
                .iter()
                .fold(self.offset, |acc, n| acc.saturating_add(n.payload.sum()));
            Ok(Payload::scalar(total))
        }

        fn resources(&self, _roi: RoiKey) -> Vec<ResourceId> {
            self.reads.clone()
        }
    }

    struct Broken;

    impl Algorithm for Broken {
        fn execute(&self, _inputs: &AlgorithmInputs<'_>) -> Result<Payload, ErrorSignal> {
            Err(ErrorSignal::new(Action::Continue, Reason::Code(7)))
        }
    }

    fn summer(offset: i64, calls: &Arc<AtomicUsize>) -> Summer {
        Summer {
            offset,
            calls: Arc::clone(calls),
            reads: Vec::new(),
        }
    }

    fn seeded_graph() -> FeatureGraph {
        let mut graph = FeatureGraph::new();
        graph.insert(FeatureNode::new(
            FeatureType::new("Seed"),
            RoiKey(7),
            Payload::scalar(10),
        ));
        graph
    }

    #[test]
    fn produces_through_chain_of_sequences() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = AlgorithmRegistry::new();
        registry
            .register_extractor("cluster", summer(1, &calls))
            .register_extractor("track", summer(100, &calls));
        let menu = Menu::new()
            .seed_type("Seed")
            .sequence(SequenceDef::new("Cluster", "cluster", &["Seed"]))
            .sequence(SequenceDef::new("Track", "track", &["Cluster"]));

        let mut resolver = SequenceResolver::build(&menu, &registry).expect("build");
        assert_eq!(resolver.plan(&FeatureType::new("Track")), &[0, 1]);

        let mut graph = seeded_graph();
        let token = CancellationToken::new();
        let id = resolver
            .produce(&FeatureType::new("Track"), RoiKey(7), &mut graph, &token)
            .expect("produce");
        assert_eq!(graph.node(id).and_then(|n| n.payload.first()), Some(111));

        // Second request is served from the graph.
        let again = resolver
            .produce(&FeatureType::new("Track"), RoiKey(7), &mut graph, &token)
            .expect("produce");
        assert_eq!(id, again);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.total_invocations(), 2);
    }

    #[test]
    fn failure_is_cached_as_tombstone() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = AlgorithmRegistry::new();
        registry
            .register_extractor("broken", Broken)
            .register_extractor("after", summer(0, &calls));
        let menu = Menu::new()
            .seed_type("Seed")
            .sequence(SequenceDef::new("Bad", "broken", &["Seed"]))
            .sequence(SequenceDef::new("After", "after", &["Bad"]));
        let mut resolver = SequenceResolver::build(&menu, &registry).expect("build");

        let mut graph = seeded_graph();
        let token = CancellationToken::new();
        let first = resolver.produce(&FeatureType::new("After"), RoiKey(7), &mut graph, &token);
        let second = resolver.produce(&FeatureType::new("After"), RoiKey(7), &mut graph, &token);

        let expected = ErrorSignal::abort_chain(Reason::Code(7));
        assert_eq!(first, Err(expected));
        assert_eq!(second, Err(expected));
        assert_eq!(resolver.steps()[0].invocations(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_seed_is_chain_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = AlgorithmRegistry::new();
        registry.register_extractor("cluster", summer(0, &calls));
        let menu = Menu::new()
            .seed_type("Seed")
            .sequence(SequenceDef::new("Cluster", "cluster", &["Seed"]));
        let mut resolver = SequenceResolver::build(&menu, &registry).expect("build");

        let mut graph = FeatureGraph::new();
        let result = resolver.produce(
            &FeatureType::new("Cluster"),
            RoiKey(1),
            &mut graph,
            &CancellationToken::new(),
        );
        assert_eq!(
            result,
            Err(ErrorSignal::abort_chain(Reason::MissingFeature))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cycle_is_configuration_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = AlgorithmRegistry::new();
        registry
            .register_extractor("a", summer(0, &calls))
            .register_extractor("b", summer(0, &calls));
        let menu = Menu::new()
            .sequence(SequenceDef::new("A", "a", &["B"]))
            .sequence(SequenceDef::new("B", "b", &["A"]));

        let path = match SequenceResolver::build(&menu, &registry) {
            Err(SteerError::CyclicSequence(path)) => path,
            _ => Vec::new(),
        };
        assert_eq!(path.len(), 3);
        assert_eq!(path.first(), path.last());
    }

    #[test]
    fn cycle_through_seed_input_detected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = AlgorithmRegistry::new();
        registry.register_extractor("a", summer(0, &calls));
        let menu = Menu::new().sequence(SequenceDef::new("A", "a", &[]).with_seed("A"));

        assert!(matches!(
            SequenceResolver::build(&menu, &registry),
            Err(SteerError::CyclicSequence(_))
        ));
    }

    #[test]
    fn unknown_type_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = AlgorithmRegistry::new();
        registry.register_extractor("a", summer(0, &calls));
        let menu = Menu::new().sequence(SequenceDef::new("A", "a", &["Nowhere"]));

        assert!(matches!(
            SequenceResolver::build(&menu, &registry),
            Err(SteerError::UnknownType(ty)) if ty.as_str() == "Nowhere"
        ));
    }

    #[test]
    fn unbound_algorithm_rejected() {
        let menu = Menu::new()
            .seed_type("Seed")
            .sequence(SequenceDef::new("A", "ghost", &["Seed"]));
        assert!(matches!(
            SequenceResolver::build(&menu, &AlgorithmRegistry::new()),
            Err(SteerError::UnresolvedBinding(_))
        ));
    }

    #[test]
    fn requirements_skip_cached_steps() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = AlgorithmRegistry::new();
        registry
            .register_extractor(
                "cluster",
                Summer {
                    offset: 0,
                    calls: Arc::clone(&calls),
                    reads: vec![ResourceId(1), ResourceId(2)],
                },
            )
            .register_extractor(
                "track",
                Summer {
                    offset: 0,
                    calls: Arc::clone(&calls),
                    reads: vec![ResourceId(3)],
                },
            );
        let menu = Menu::new()
            .seed_type("Seed")
            .sequence(SequenceDef::new("Cluster", "cluster", &["Seed"]))
            .sequence(SequenceDef::new("Track", "track", &["Cluster"]));
        let mut resolver = SequenceResolver::build(&menu, &registry).expect("build");
        let mut graph = seeded_graph();
        let track = FeatureType::new("Track");

        assert_eq!(
            resolver.requirements(&track, RoiKey(7), &graph),
            vec![ResourceId(1), ResourceId(2), ResourceId(3)]
        );

        resolver
            .produce(
                &FeatureType::new("Cluster"),
                RoiKey(7),
                &mut graph,
                &CancellationToken::new(),
            )
            .expect("produce");
        assert_eq!(
            resolver.requirements(&track, RoiKey(7), &graph),
            vec![ResourceId(3)]
        );
    }
}
