//! Shared collaborators and algorithms for the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use steer_core::{
    Action, Algorithm, AlgorithmInputs, ChainId, Decider, ErrorSignal, Event, EventAcceptSink,
    EventIdentity, EventRecord, FeatureNode, FeatureType, LumiBlock, Menu, Payload,
    PrescaleDecision, Reason, ResourceFetcher, ResourceId, ResultConsumer, RoiKey, Scaler,
    SeedActivation, Services, SteeringEngine,
};

// =============================================================================
// ALGORITHMS
// =============================================================================

/// Sum of every primary input payload (the seed side input is ignored).
pub struct Sum;

impl Algorithm for Sum {
    fn execute(&self, inputs: &AlgorithmInputs<'_>) -> Result<Payload, ErrorSignal> {
        Ok(Payload::scalar(
            inputs
                .primary
                .iter()
                .fold(0i64, |acc, n| acc.saturating_add(n.payload.sum())),
        ))
    }

    fn resources(&self, roi: RoiKey) -> Vec<ResourceId> {
        vec![ResourceId(roi.0)]
    }
}

/// Always yields the same value.
pub struct Constant(pub i64);

impl Algorithm for Constant {
    fn execute(&self, _inputs: &AlgorithmInputs<'_>) -> Result<Payload, ErrorSignal> {
        Ok(Payload::scalar(self.0))
    }
}

/// Always fails with the given signal.
pub struct Failing(pub ErrorSignal);

impl Algorithm for Failing {
    fn execute(&self, _inputs: &AlgorithmInputs<'_>) -> Result<Payload, ErrorSignal> {
        Err(self.0)
    }
}

/// Sleeps, then forwards its first input.
pub struct Sleep(pub Duration);

impl Algorithm for Sleep {
    fn execute(&self, inputs: &AlgorithmInputs<'_>) -> Result<Payload, ErrorSignal> {
        std::thread::sleep(self.0);
        Ok(inputs
            .primary
            .first()
            .map(|n| n.payload.clone())
            .unwrap_or_default())
    }
}

/// Passes when the first payload value is strictly above the threshold.
pub struct Above(pub i64);

impl Decider for Above {
    fn decide(&self, node: &FeatureNode) -> Result<bool, ErrorSignal> {
        node.payload
            .first()
            .map(|v| v > self.0)
            .ok_or(ErrorSignal::abort_chain(Reason::DecisionFailure))
    }
}

// =============================================================================
// COLLABORATORS
// =============================================================================

/// Records every batched request. Each request fails with `fail` when set.
#[derive(Default)]
pub struct Fetches {
    pub batches: Vec<BTreeSet<ResourceId>>,
    pub fail: Option<ErrorSignal>,
}

impl ResourceFetcher for Fetches {
    fn request(&mut self, ids: &BTreeSet<ResourceId>) -> Result<(), ErrorSignal> {
        self.batches.push(ids.clone());
        self.fail.map_or(Ok(()), Err)
    }
}

/// Records every accept trigger.
#[derive(Default)]
pub struct Accepts {
    pub triggers: Vec<usize>,
}

impl EventAcceptSink for Accepts {
    fn trigger(&mut self, step_index: usize) {
        self.triggers.push(step_index);
    }
}

/// Keeps every finalized record.
#[derive(Default)]
pub struct Records {
    pub records: Vec<EventRecord>,
}

impl ResultConsumer for Records {
    fn finalize(&mut self, record: &EventRecord) -> ErrorSignal {
        self.records.push(record.clone());
        ErrorSignal::OK
    }
}

/// Scaler answering from a fixed table (accept when absent), recording who
/// was asked.
#[derive(Default)]
pub struct TableScaler {
    pub decisions: BTreeMap<ChainId, PrescaleDecision>,
    pub asked: Vec<(ChainId, LumiBlock)>,
}

impl TableScaler {
    pub fn with(mut self, chain: u32, decision: PrescaleDecision) -> Self {
        self.decisions.insert(ChainId(chain), decision);
        self
    }
}

impl Scaler for TableScaler {
    fn decide(&mut self, chain: ChainId, lumi_block: LumiBlock) -> PrescaleDecision {
        self.asked.push((chain, lumi_block));
        self.decisions
            .get(&chain)
            .copied()
            .unwrap_or(PrescaleDecision::ACCEPT)
    }
}

/// All collaborators of one test, lent to the engine per event.
pub struct Rig<S: Scaler> {
    pub activation: SeedActivation,
    pub scaler: S,
    pub fetches: Fetches,
    pub accepts: Accepts,
    pub records: Records,
}

impl<S: Scaler> Rig<S> {
    pub fn new(menu: &Menu, scaler: S) -> Self {
        Self {
            activation: SeedActivation::from_menu(menu),
            scaler,
            fetches: Fetches::default(),
            accepts: Accepts::default(),
            records: Records::default(),
        }
    }

    pub fn services(&mut self) -> Services<'_> {
        Services {
            activation: &mut self.activation,
            scaler: &mut self.scaler,
            fetcher: &mut self.fetches,
            accept: &mut self.accepts,
            consumer: &mut self.records,
        }
    }

    pub fn run(&mut self, engine: &mut SteeringEngine, event: &Event) -> ErrorSignal {
        let mut services = self.services();
        engine.run(event, &mut services)
    }

    pub fn last(&self) -> &EventRecord {
        self.records.records.last().expect("a finalized record")
    }
}

// =============================================================================
// HELPERS
// =============================================================================

pub fn identity(number: u64, lumi_block: u32) -> EventIdentity {
    EventIdentity {
        run: 1,
        lumi_block: LumiBlock(lumi_block),
        number,
    }
}

/// Event carrying `(type, roi, value)` seeds.
pub fn event(number: u64, lumi_block: u32, seeds: &[(&str, u64, i64)]) -> Event {
    Event::new(
        identity(number, lumi_block),
        seeds
            .iter()
            .map(|&(ty, roi, value)| {
                FeatureNode::new(FeatureType::new(ty), RoiKey(roi), Payload::scalar(value))
            })
            .collect(),
    )
}

/// Invocations of the sequence producing `output`.
pub fn invocations(engine: &SteeringEngine, output: &str) -> u64 {
    engine
        .resolver()
        .steps()
        .iter()
        .find(|s| s.output.as_str() == output)
        .map(|s| s.invocations())
        .unwrap_or(0)
}

pub fn is_job_abort(signal: ErrorSignal) -> bool {
    signal.action == Action::AbortJob
}
