//! # steer-core
//!
//! The event-level decision steering engine - THE SCHEDULER.
//!
//! Given one event, the engine activates a configured set of decision
//! pipelines ("chains"), executes them step by step through a shared,
//! memoized feature graph, applies prescaling and a rerun pass, enforces
//! soft and hard wall-clock deadlines, and hands the final verdicts to a
//! downstream consumer.
//!
//! ## Architectural Constraints
//!
//! The engine:
//! - Processes one event at a time, synchronously, to completion
//! - Computes each `(feature type, roi)` at most once per event
//! - Never lets a per-event failure escape as a panic or `SteerError`;
//!   failures travel as [`ErrorSignal`] values folded into the event status
//! - Is closed: algorithms, activation, prescaling, data fetch and result
//!   handling are injected through traits
//! - Has NO async, NO network dependencies (pure Rust)
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = SteeringEngine::configure(&menu, registry, EngineConfig::default())?;
//! let summary = engine.run_all(&events, &mut services)?;
//! ```

// =============================================================================
// MODULES
// =============================================================================

pub mod algorithm;
pub mod chain;
pub mod deadline;
pub mod engine;
pub mod feature;
pub mod menu;
pub mod ordering;
pub mod prescale;
pub mod primitives;
pub mod resources;
pub mod sequence;
pub mod services;
pub mod signal;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ChainId, Event, EventIdentity, FeatureType, LumiBlock, Payload, ResourceId, RoiKey,
    SteerError,
};

// =============================================================================
// RE-EXPORTS: Signals & Features
// =============================================================================

pub use feature::{FeatureGraph, FeatureNode, SlotId};
pub use signal::{Action, ErrorSignal, EventStatus, Reason, Scope};

// =============================================================================
// RE-EXPORTS: Configuration
// =============================================================================

pub use algorithm::{
    Algorithm, AlgorithmInputs, AlgorithmRegistry, AlgorithmStep, Binding, Capability, Decider,
};
pub use menu::{ChainDef, GroupDef, Menu, SequenceDef, StepDef};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use chain::{Chain, ChainState, ChainVerdict, Outcome, RejectCause, Step};
pub use deadline::{CancellationToken, Deadlines, TimerWatchdog, Watchdog};
pub use engine::{ChainCounters, EngineConfig, RunSummary, SteeringEngine};
pub use ordering::{MenuOrder, OrderingPolicy, PriorityOrdering};
pub use prescale::{CoherentGroups, CounterScaler, PrescaleDecision, Scaler};
pub use resources::ResourceRequestBatcher;
pub use sequence::SequenceResolver;

// =============================================================================
// RE-EXPORTS: External Collaborators
// =============================================================================

pub use services::{
    Activation, ActivationResult, ActiveChain, EventAcceptSink, EventRecord, ResourceFetcher,
    ResultConsumer, SeedActivation, Services,
};
