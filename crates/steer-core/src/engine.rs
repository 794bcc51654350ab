//! # Steering Engine
//!
//! Drives one event at a time through the configured chains.
//!
//! ## Per-event flow
//!
//! 1. Reset the feature graph and every chain, start both deadlines.
//! 2. Check the event identity, call activation, insert seeds.
//! 3. Take prescale decisions (group masters only) and order the chains.
//! 4. Step loop: batch and flush resources, run each running chain's next
//!    step, fold signals, fire the accept trigger on the first pass.
//! 5. Rerun pass for prescaled chains if the event was accepted.
//! 6. Hand the [`EventRecord`] to the result consumer, then reset.
//!
//! A job-level abort skips step 6's finalize but never the reset.

use crate::algorithm::AlgorithmRegistry;
use crate::chain::{Chain, ChainState, Outcome};
use crate::deadline::{CancellationToken, Deadlines, Watchdog};
use crate::feature::FeatureGraph;
use crate::menu::Menu;
use crate::ordering::{OrderingPolicy, PriorityOrdering};
use crate::prescale::{CoherentGroups, PrescaleDecision};
use crate::primitives::{DEFAULT_HARD_TIMEOUT_MS, DEFAULT_SOFT_TIMEOUT_MS};
use crate::resources::ResourceRequestBatcher;
use crate::sequence::SequenceResolver;
use crate::services::{EventRecord, Services};
use crate::signal::{Action, ErrorSignal, EventStatus, Reason, Scope};
use crate::types::{ChainId, Event, SteerError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Runtime knobs of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Cooperative per-event budget. `None` disables it.
    pub soft_timeout: Option<Duration>,
    /// Watchdog per-event budget. `None` disables it.
    pub hard_timeout: Option<Duration>,
    /// Run prescaled chains again once the event is accepted.
    pub rerun: bool,
    /// When false every decision is skipped and counts as a pass.
    pub decisions_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            soft_timeout: Some(Duration::from_millis(DEFAULT_SOFT_TIMEOUT_MS)),
            hard_timeout: Some(Duration::from_millis(DEFAULT_HARD_TIMEOUT_MS)),
            rerun: true,
            decisions_enabled: true,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_soft_timeout(mut self, budget: Option<Duration>) -> Self {
        self.soft_timeout = budget;
        self
    }

    #[must_use]
    pub fn with_hard_timeout(mut self, budget: Option<Duration>) -> Self {
        self.hard_timeout = budget;
        self
    }

    #[must_use]
    pub fn with_rerun(mut self, rerun: bool) -> Self {
        self.rerun = rerun;
        self
    }

    #[must_use]
    pub fn with_decisions(mut self, enabled: bool) -> Self {
        self.decisions_enabled = enabled;
        self
    }
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Per-chain tallies over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCounters {
    /// Passed in the first pass.
    pub passed: u64,
    pub rejected: u64,
    pub rejected_by_error: u64,
    /// Cut short by an event-level abort.
    pub aborted: u64,
    /// Skipped by prescaling in the first pass.
    pub prescaled: u64,
    /// Passed in the rerun pass.
    pub rerun_passed: u64,
}

/// Tallies over every event run by one engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub events: u64,
    pub accepted: u64,
    /// Events that ended at `AbortEvent` or worse.
    pub aborted_events: u64,
    pub chains: BTreeMap<String, ChainCounters>,
    /// Algorithm invocations across all events.
    pub invocations: u64,
    /// Feature lookups answered from the graph.
    pub cache_hits: u64,
}

// =============================================================================
// ENGINE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    First,
    Rerun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Finished,
    JobAborted,
}

struct EventContext {
    status: EventStatus,
    deadlines: Deadlines,
    accepted_at: Option<usize>,
}

/// The event-level decision scheduler.
pub struct SteeringEngine {
    config: EngineConfig,
    resolver: SequenceResolver,
    chains: Vec<Chain>,
    slots: BTreeMap<ChainId, usize>,
    groups: CoherentGroups,
    ordering: Box<dyn OrderingPolicy>,
    watchdog: Option<Box<dyn Watchdog>>,
    graph: FeatureGraph,
    batcher: ResourceRequestBatcher,
    token: CancellationToken,
    summary: RunSummary,
}

impl std::fmt::Debug for SteeringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteeringEngine")
            .field("config", &self.config)
            .field("chains", &self.chains.len())
            .field("sequences", &self.resolver.steps().len())
            .field("watchdog", &self.watchdog.is_some())
            .finish()
    }
}

impl SteeringEngine {
    /// Validate `menu`, bind every algorithm and resolve every plan.
    ///
    /// All configuration errors surface here; nothing per event can fail
    /// with a `SteerError`.
    pub fn configure(
        menu: &Menu,
        registry: AlgorithmRegistry,
        config: EngineConfig,
    ) -> Result<Self, SteerError> {
        menu.validate()?;
        let resolver = SequenceResolver::build(menu, &registry)?;
        let groups = CoherentGroups::from_menu(menu)?;

        let mut chains = menu
            .chains
            .iter()
            .map(|def| Chain::from_def(def, &registry))
            .collect::<Result<Vec<_>, _>>()?;
        for chain in &mut chains {
            chain.master = groups.master(chain.id);
        }

        let slots = chains
            .iter()
            .enumerate()
            .map(|(slot, chain)| (chain.id, slot))
            .collect();
        let summary = RunSummary {
            chains: chains
                .iter()
                .map(|c| (c.name.clone(), ChainCounters::default()))
                .collect(),
            ..RunSummary::default()
        };

        info!(
            chains = chains.len(),
            sequences = resolver.steps().len(),
            groups = menu.groups.len(),
            "steering engine configured"
        );

        Ok(Self {
            config,
            resolver,
            chains,
            slots,
            groups,
            ordering: Box::new(PriorityOrdering::default()),
            watchdog: None,
            graph: FeatureGraph::new(),
            batcher: ResourceRequestBatcher::new(),
            token: CancellationToken::new(),
            summary,
        })
    }

    /// Replace the ordering policy.
    #[must_use]
    pub fn with_ordering(mut self, policy: impl OrderingPolicy + 'static) -> Self {
        self.ordering = Box::new(policy);
        self
    }

    /// Install a watchdog for the hard deadline. Without one the hard
    /// deadline is still observed at safe-points.
    #[must_use]
    pub fn with_watchdog(mut self, watchdog: impl Watchdog + 'static) -> Self {
        self.watchdog = Some(Box::new(watchdog));
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Configured chains in menu order.
    #[must_use]
    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    #[must_use]
    pub fn resolver(&self) -> &SequenceResolver {
        &self.resolver
    }

    /// Token the watchdog cancels. Exposed so callers can kill the current
    /// event from outside.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Tallies so far.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let mut summary = self.summary.clone();
        summary.invocations = self.resolver.total_invocations();
        summary.cache_hits = self.graph.cache_hits();
        summary
    }

    /// Clear every piece of per-event state.
    pub fn reset(&mut self) {
        self.graph.clear();
        for chain in &mut self.chains {
            chain.reset();
        }
        self.batcher.clear();
        self.token.clear();
    }

    /// Steer one event. Returns the worst signal of the event.
    pub fn run(&mut self, event: &Event, services: &mut Services<'_>) -> ErrorSignal {
        let span = tracing::debug_span!(
            "event",
            number = event.identity.map(|id| id.number),
            lumi_block = event.identity.map(|id| id.lumi_block.0),
        );
        let _entered = span.enter();

        self.reset();
        let mut ctx = EventContext {
            status: EventStatus::new(),
            deadlines: Deadlines::start(self.config.soft_timeout, self.config.hard_timeout),
            accepted_at: None,
        };
        if let (Some(watchdog), Some(budget)) = (self.watchdog.as_mut(), self.config.hard_timeout) {
            watchdog.arm(budget, self.token.clone());
        }

        let flow = self.process(event, services, &mut ctx);

        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.disarm();
        }
        self.summary.events = self.summary.events.saturating_add(1);

        match flow {
            Flow::Finished => {
                let record = self.record(event, &ctx);
                let consumed = services.consumer.finalize(&record);
                if !consumed.is_ok() {
                    warn!(signal = %consumed, "result consumer failed");
                }
                ctx.status.fold(consumed);
                self.tally(&record);
            }
            Flow::JobAborted => {
                warn!(signal = %ctx.status.current(), "job aborted, event not finalized");
            }
        }

        let status = ctx.status.current();
        if status.action >= Action::AbortEvent {
            self.summary.aborted_events = self.summary.aborted_events.saturating_add(1);
        }
        self.reset();
        status
    }

    /// Steer every event in order, stopping at the first job-level abort.
    pub fn run_all<'e>(
        &mut self,
        events: impl IntoIterator<Item = &'e Event>,
        services: &mut Services<'_>,
    ) -> Result<RunSummary, SteerError> {
        for event in events {
            let status = self.run(event, services);
            if status.action == Action::AbortJob {
                return Err(SteerError::JobAborted(status));
            }
        }
        Ok(self.summary())
    }

    // -------------------------------------------------------------------------
    // Event internals
    // -------------------------------------------------------------------------

    fn process(
        &mut self,
        event: &Event,
        services: &mut Services<'_>,
        ctx: &mut EventContext,
    ) -> Flow {
        let Some(identity) = event.identity else {
            warn!("event without identity");
            ctx.status.fold(ErrorSignal::abort_event(Reason::NoEventIdentity));
            return Flow::Finished;
        };

        let activation = match services.activation.activate(event) {
            Ok(activation) => activation,
            Err(signal) => {
                warn!(%signal, "activation failed");
                return if ctx.status.can_continue(signal, Scope::Job) {
                    Flow::Finished
                } else {
                    Flow::JobAborted
                };
            }
        };
        for seed in activation.seeds {
            self.graph.insert(seed);
        }

        let requested: Vec<ChainId> = activation
            .chains
            .iter()
            .map(|active| active.chain)
            .filter(|id| self.slots.contains_key(id))
            .collect();
        let decisions = self
            .groups
            .decide_all(&requested, identity.lumi_block, services.scaler);

        for active in activation.chains {
            let Some(&slot) = self.slots.get(&active.chain) else {
                warn!(chain = %active.chain, "activation named an unknown chain");
                continue;
            };
            let decision = decisions
                .get(&active.chain)
                .copied()
                .unwrap_or(PrescaleDecision::ACCEPT);
            let chain = &mut self.chains[slot];
            if decision.accept {
                chain.activate(active.rois);
            } else if decision.was_prescaled {
                chain.prescale_out(active.rois);
            } else {
                debug!(chain = %chain.name, "chain disabled");
            }
        }

        let order = self.execution_order();
        debug!(active = order.len(), "first pass");
        if self.step_loop(&order, services, ctx, Pass::First) == Flow::JobAborted {
            return Flow::JobAborted;
        }

        if self.config.rerun
            && ctx.accepted_at.is_some()
            && ctx.status.can_continue(ErrorSignal::OK, Scope::Event)
        {
            let resurrected = self
                .chains
                .iter_mut()
                .filter(|chain| chain.rerun)
                .fold(0usize, |n, chain| if chain.resurrect() { n + 1 } else { n });
            if resurrected > 0 {
                debug!(resurrected, "rerun pass");
                let order = self.execution_order();
                return self.step_loop(&order, services, ctx, Pass::Rerun);
            }
        }
        Flow::Finished
    }

    fn step_loop(
        &mut self,
        order: &[usize],
        services: &mut Services<'_>,
        ctx: &mut EventContext,
        pass: Pass,
    ) -> Flow {
        let mut step_index = 0usize;
        loop {
            if self.killed(&ctx.deadlines) {
                return self.abort_job(ctx, ErrorSignal::abort_job(Reason::HardTimeout));
            }
            let running: Vec<usize> = order
                .iter()
                .copied()
                .filter(|&slot| self.chains[slot].is_running())
                .collect();
            if running.is_empty() {
                return Flow::Finished;
            }
            if ctx.deadlines.soft_expired() {
                warn!(
                    step_index,
                    elapsed_ms = ctx.deadlines.elapsed().as_millis() as u64,
                    "soft deadline expired"
                );
                ctx.status.fold(ErrorSignal::abort_event(Reason::SoftTimeout));
            }
            if !ctx.status.can_continue(ErrorSignal::OK, Scope::Event) {
                self.halt_running();
                return Flow::Finished;
            }

            // Slots whose step needs at least one id not fetched yet.
            let mut contributors = BTreeSet::new();
            for &slot in &running {
                let chain = &self.chains[slot];
                if let Some(output) = chain.pending_output() {
                    for &roi in chain.rois() {
                        let needed = self
                            .batcher
                            .add(self.resolver.requirements(output, roi, &self.graph));
                        if needed > 0 {
                            contributors.insert(slot);
                        }
                    }
                }
            }
            if let Err(signal) = self.batcher.flush(services.fetcher) {
                warn!(
                    %signal,
                    step_index,
                    chains = contributors.len(),
                    "resource fetch failed"
                );
                if !ctx.status.can_continue(signal, Scope::Event) {
                    self.halt_running();
                    return Flow::Finished;
                }
                for &slot in &contributors {
                    self.chains[slot].fail(signal);
                }
            }
            if self.killed(&ctx.deadlines) {
                return self.abort_job(ctx, ErrorSignal::abort_job(Reason::HardTimeout));
            }

            for &slot in &running {
                if !self.chains[slot].is_running() {
                    continue;
                }
                let signal = self.chains[slot].execute_step(
                    &mut self.resolver,
                    &mut self.graph,
                    &self.token,
                    self.config.decisions_enabled,
                );
                if signal.action == Action::AbortJob {
                    return self.abort_job(ctx, signal);
                }
                if self.killed(&ctx.deadlines) {
                    ctx.status.fold(signal);
                    return self.abort_job(ctx, ErrorSignal::abort_job(Reason::HardTimeout));
                }
                if !ctx.status.can_continue(signal, Scope::Chain) {
                    debug!(chain = %self.chains[slot].name, %signal, state = ?self.chains[slot].state(), "chain stopped");
                }

                if pass == Pass::First
                    && ctx.accepted_at.is_none()
                    && self.chains[slot].state() == ChainState::Passed
                {
                    ctx.accepted_at = Some(step_index);
                    info!(chain = %self.chains[slot].name, step_index, "event accepted");
                    services.accept.trigger(step_index);
                }

                if !ctx.status.can_continue(ErrorSignal::OK, Scope::Event) {
                    warn!(signal = %ctx.status.current(), "event aborted");
                    self.halt_running();
                    return Flow::Finished;
                }
            }
            step_index += 1;
        }
    }

    /// Running chains in the order the policy asks for. Chains the policy
    /// dropped are appended in menu order; duplicates are ignored.
    fn execution_order(&self) -> Vec<usize> {
        let running: Vec<&Chain> = self.chains.iter().filter(|c| c.is_running()).collect();
        let mut seen = BTreeSet::new();
        let mut order = Vec::with_capacity(running.len());
        for chain in self.ordering.apply(running) {
            if let Some(&slot) = self.slots.get(&chain.id) {
                if seen.insert(slot) {
                    order.push(slot);
                }
            }
        }
        for (slot, chain) in self.chains.iter().enumerate() {
            if chain.is_running() && seen.insert(slot) {
                order.push(slot);
            }
        }
        order
    }

    fn killed(&self, deadlines: &Deadlines) -> bool {
        self.token.is_cancelled() || deadlines.hard_expired()
    }

    fn abort_job(&mut self, ctx: &mut EventContext, signal: ErrorSignal) -> Flow {
        ctx.status.fold(signal);
        warn!(
            %signal,
            status = %ctx.status.current(),
            elapsed_ms = ctx.deadlines.elapsed().as_millis() as u64,
            "job aborted"
        );
        self.halt_running();
        Flow::JobAborted
    }

    fn halt_running(&mut self) {
        for chain in &mut self.chains {
            chain.halt();
        }
    }

    fn record(&self, event: &Event, ctx: &EventContext) -> EventRecord {
        EventRecord {
            identity: event.identity,
            status: ctx.status.current(),
            accepted: ctx.accepted_at.is_some(),
            accept_step: ctx.accepted_at,
            verdicts: self.chains.iter().filter_map(Chain::verdict).collect(),
        }
    }

    fn tally(&mut self, record: &EventRecord) {
        if record.accepted {
            self.summary.accepted = self.summary.accepted.saturating_add(1);
        }
        for verdict in &record.verdicts {
            let counters = self.summary.chains.entry(verdict.name.clone()).or_default();
            let slot = match (verdict.outcome, verdict.resurrected) {
                (Outcome::Passed, false) => &mut counters.passed,
                (Outcome::Passed, true) => &mut counters.rerun_passed,
                (Outcome::Rejected, _) => &mut counters.rejected,
                (Outcome::RejectedByError, _) => &mut counters.rejected_by_error,
                (Outcome::Aborted, _) => &mut counters.aborted,
            };
            *slot = slot.saturating_add(1);
            if verdict.resurrected {
                counters.prescaled = counters.prescaled.saturating_add(1);
            }
        }
        for chain in &self.chains {
            if chain.state() == ChainState::Prescaled {
                let counters = self.summary.chains.entry(chain.name.clone()).or_default();
                counters.prescaled = counters.prescaled.saturating_add(1);
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
