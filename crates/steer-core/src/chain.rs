//! # Chains
//!
//! A chain is an ordered list of steps evaluated for one event. Its static
//! shape is built once by `configure()`; its run state is reset at the start
//! of every event and only the engine mutates it.
//!
//! ## State machine
//!
//! ```text
//!            activate                 last step passes
//!   Idle ───────────────▶ Active ─────────────────────────▶ Passed
//!     │                     │  decision rejects
//!     │                     ├──────────────────────────────▶ Rejected(Decision)
//!     │                     │  production/decision fails
//!     │                     ├──────────────────────────────▶ Rejected(Error)
//!     │                     │  event aborted
//!     │                     └──────────────────────────────▶ Done
//!     │ prescale_out              resurrect
//!     └───────────────▶ Prescaled ──────────▶ Resurrected ─▶ (as Active)
//! ```
//!
//! The step index only moves forward within one event, so no step runs twice.

use crate::algorithm::{AlgorithmRegistry, Decider};
use crate::deadline::CancellationToken;
use crate::feature::FeatureGraph;
use crate::menu::ChainDef;
use crate::sequence::SequenceResolver;
use crate::signal::{Action, ErrorSignal, Reason};
use crate::types::{ChainId, FeatureType, RoiKey, SteerError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// STEP
// =============================================================================

/// One stage of a chain.
#[derive(Clone)]
pub struct Step {
    /// Feature the step needs before the chain may continue.
    pub output: FeatureType,
    /// Binding name of the decision, if any.
    pub decision_name: Option<String>,
    /// Rois that must survive the decision for the step to pass.
    pub multiplicity: usize,
    decision: Option<Arc<dyn Decider>>,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("output", &self.output)
            .field("decision", &self.decision_name)
            .field("multiplicity", &self.multiplicity)
            .finish()
    }
}

// =============================================================================
// STATE & VERDICT
// =============================================================================

/// Why a chain was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectCause {
    /// A decision function said no.
    Decision,
    /// A production or decision failed.
    Error,
}

/// Per-event state of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChainState {
    #[default]
    Idle,
    Active,
    Resurrected,
    Prescaled,
    Passed,
    Rejected(RejectCause),
    Done,
}

/// Final word of a chain on an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Passed,
    Rejected,
    RejectedByError,
    /// Cut short by an event-level abort.
    Aborted,
}

/// Verdict record handed to the result consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerdict {
    pub chain: ChainId,
    pub name: String,
    pub outcome: Outcome,
    /// Produced by the rerun pass.
    pub resurrected: bool,
    /// Number of steps executed this event.
    pub steps_run: usize,
    /// Worst signal this chain produced.
    pub status: ErrorSignal,
}

// =============================================================================
// CHAIN
// =============================================================================

/// A configured chain plus its per-event run state.
#[derive(Debug, Clone)]
pub struct Chain {
    pub id: ChainId,
    pub name: String,
    pub seed: Option<FeatureType>,
    pub priority: i32,
    pub prescale: u32,
    pub rerun: bool,
    /// Chain whose prescale decision this one follows (itself when
    /// ungrouped).
    pub master: ChainId,
    steps: Vec<Step>,
    state: ChainState,
    next_step: usize,
    rois: Vec<RoiKey>,
    resurrected: bool,
    status: ErrorSignal,
}

impl Chain {
    /// Build a chain from its menu definition, binding its deciders.
    pub fn from_def(def: &ChainDef, registry: &AlgorithmRegistry) -> Result<Self, SteerError> {
        let steps = def
            .steps
            .iter()
            .map(|s| {
                let decision = s
                    .decision
                    .as_deref()
                    .map(|name| registry.decider(name))
                    .transpose()?;
                Ok(Step {
                    output: s.output.clone(),
                    decision_name: s.decision.clone(),
                    multiplicity: s.multiplicity,
                    decision,
                })
            })
            .collect::<Result<Vec<_>, SteerError>>()?;

        let id = ChainId(def.counter);
        Ok(Self {
            id,
            name: def.name.clone(),
            seed: def.seed.clone(),
            priority: def.priority,
            prescale: def.prescale,
            rerun: def.rerun,
            master: id,
            steps,
            state: ChainState::Idle,
            next_step: 0,
            rois: Vec::new(),
            resurrected: false,
            status: ErrorSignal::OK,
        })
    }

    /// Configured steps.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Current per-event state.
    #[must_use]
    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Index of the next step to run.
    #[must_use]
    pub fn next_step(&self) -> usize {
        self.next_step
    }

    /// Rois still alive in this chain.
    #[must_use]
    pub fn rois(&self) -> &[RoiKey] {
        &self.rois
    }

    /// Check if the chain still has steps to run this event.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state, ChainState::Active | ChainState::Resurrected)
    }

    /// Output type of the next step, if the chain is running.
    #[must_use]
    pub fn pending_output(&self) -> Option<&FeatureType> {
        if !self.is_running() {
            return None;
        }
        self.steps.get(self.next_step).map(|s| &s.output)
    }

    /// Forget everything about the current event.
    pub fn reset(&mut self) {
        self.state = ChainState::Idle;
        self.next_step = 0;
        self.rois.clear();
        self.resurrected = false;
        self.status = ErrorSignal::OK;
    }

    /// Enter `Active` with the rois that seeded the chain.
    pub fn activate(&mut self, rois: Vec<RoiKey>) {
        if self.state == ChainState::Idle {
            self.rois = rois;
            self.state = ChainState::Active;
        }
    }

    /// Skip the first pass because of prescaling, remembering the rois for a
    /// possible rerun.
    pub fn prescale_out(&mut self, rois: Vec<RoiKey>) {
        if self.state == ChainState::Idle {
            self.rois = rois;
            self.state = ChainState::Prescaled;
        }
    }

    /// Bring a prescaled chain back for the rerun pass.
    pub fn resurrect(&mut self) -> bool {
        if self.state != ChainState::Prescaled {
            return false;
        }
        self.state = ChainState::Resurrected;
        self.resurrected = true;
        true
    }

    /// Stop a running chain because the event was aborted.
    pub fn halt(&mut self) {
        if self.is_running() {
            self.state = ChainState::Done;
        }
    }

    /// Reject a running chain because something it depends on failed outside
    /// its own step (a batched resource fetch).
    pub fn fail(&mut self, signal: ErrorSignal) {
        if self.is_running() {
            self.status = self.status.worst(signal.escalate_to(Action::AbortChain));
            self.state = ChainState::Rejected(RejectCause::Error);
        }
    }

    /// Run the next step: produce the step's feature at every surviving roi,
    /// then apply the decision.
    ///
    /// Returns the signal of the step. The chain's own state is updated;
    /// folding the signal into the event status is the caller's job.
    pub fn execute_step(
        &mut self,
        resolver: &mut SequenceResolver,
        graph: &mut FeatureGraph,
        cancel: &CancellationToken,
        decisions_enabled: bool,
    ) -> ErrorSignal {
        if !self.is_running() {
            return ErrorSignal::OK;
        }
        let Some(step) = self.steps.get(self.next_step) else {
            self.state = ChainState::Passed;
            return ErrorSignal::OK;
        };

        let mut survivors = Vec::with_capacity(self.rois.len());
        let mut signal = ErrorSignal::OK;
        for &roi in &self.rois {
            let id = match resolver.produce(&step.output, roi, graph, cancel) {
                Ok(id) => id,
                Err(failure) => {
                    signal = failure;
                    break;
                }
            };
            let keep = match (&step.decision, decisions_enabled) {
                (Some(decider), true) => match graph.node(id) {
                    Some(node) => decider.decide(node),
                    None => Err(ErrorSignal::abort_chain(Reason::MissingFeature)),
                },
                _ => Ok(true),
            };
            match keep {
                Ok(true) => survivors.push(roi),
                Ok(false) => {}
                Err(failure) => {
                    signal = failure.escalate_to(Action::AbortChain);
                    break;
                }
            }
        }
        let multiplicity = step.multiplicity;

        self.next_step += 1;
        self.status = self.status.worst(signal);
        if !signal.is_ok() {
            self.state = ChainState::Rejected(RejectCause::Error);
        } else if survivors.len() < multiplicity {
            self.state = ChainState::Rejected(RejectCause::Decision);
        } else {
            self.rois = survivors;
            if self.next_step >= self.steps.len() {
                self.state = ChainState::Passed;
            }
        }
        signal
    }

    /// Verdict for the result consumer, if the chain has anything to say.
    ///
    /// Chains never activated, disabled, or prescaled out of both passes
    /// yield nothing.
    #[must_use]
    pub fn verdict(&self) -> Option<ChainVerdict> {
        let outcome = match self.state {
            ChainState::Idle | ChainState::Prescaled => return None,
            ChainState::Passed => Outcome::Passed,
            ChainState::Rejected(RejectCause::Decision) => Outcome::Rejected,
            ChainState::Rejected(RejectCause::Error) => Outcome::RejectedByError,
            ChainState::Active | ChainState::Resurrected | ChainState::Done => Outcome::Aborted,
        };
        Some(ChainVerdict {
            chain: self.id,
            name: self.name.clone(),
            outcome,
            resurrected: self.resurrected,
            steps_run: self.next_step,
            status: self.status,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
