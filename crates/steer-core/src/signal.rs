//! # Error Signals
//!
//! The failure value threaded through every fallible per-event call.
//!
//! An [`ErrorSignal`] pairs an escalating [`Action`] with an opaque
//! [`Reason`]. Signals are ordered by action only:
//!
//! `Continue < AbortChain < AbortEvent < AbortJob`
//!
//! The reason is a diagnostic payload. It never takes part in comparisons, so
//! two signals with the same action are equally severe whatever their reasons.
//!
//! The running worst-of-event value lives in an [`EventStatus`] that the
//! engine owns and passes explicitly to whoever needs it.

use serde::{Deserialize, Serialize};

// =============================================================================
// ACTION
// =============================================================================

/// Recovery scope requested by a failure, in increasing severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Action {
    /// Nothing went wrong.
    #[default]
    Continue,
    /// Stop the offending chain for the rest of this event.
    AbortChain,
    /// Stop the event; the next event proceeds normally.
    AbortEvent,
    /// Stop the whole job.
    AbortJob,
}

impl Action {
    /// Canonical uppercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Continue => "CONTINUE",
            Action::AbortChain => "ABORT_CHAIN",
            Action::AbortEvent => "ABORT_EVENT",
            Action::AbortJob => "ABORT_JOB",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// REASON
// =============================================================================

/// Opaque diagnostic attached to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Reason {
    #[default]
    Unspecified,
    /// A required feature was absent (seed type not provided by activation).
    MissingFeature,
    /// An extractor failed to produce its output.
    AlgorithmFailure,
    /// A decider could not evaluate its input.
    DecisionFailure,
    /// The event's identity could not be established.
    NoEventIdentity,
    /// The activation collaborator failed.
    ActivationFailure,
    /// The batched resource fetch failed.
    ResourceFailure,
    /// The result consumer failed.
    ResultFailure,
    /// The cooperative per-event deadline expired.
    SoftTimeout,
    /// The watchdog deadline expired.
    HardTimeout,
    /// Algorithm-specific code.
    Code(u32),
}

// =============================================================================
// ERROR SIGNAL
// =============================================================================

/// An immutable `(action, reason)` failure value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ErrorSignal {
    pub action: Action,
    pub reason: Reason,
}

impl ErrorSignal {
    /// The all-clear signal.
    pub const OK: ErrorSignal = ErrorSignal {
        action: Action::Continue,
        reason: Reason::Unspecified,
    };

    /// Create a signal.
    #[must_use]
    pub const fn new(action: Action, reason: Reason) -> Self {
        Self { action, reason }
    }

    /// Chain-scoped failure.
    #[must_use]
    pub const fn abort_chain(reason: Reason) -> Self {
        Self::new(Action::AbortChain, reason)
    }

    /// Event-scoped failure.
    #[must_use]
    pub const fn abort_event(reason: Reason) -> Self {
        Self::new(Action::AbortEvent, reason)
    }

    /// Job-scoped failure.
    #[must_use]
    pub const fn abort_job(reason: Reason) -> Self {
        Self::new(Action::AbortJob, reason)
    }

    /// Check if the signal requests no recovery at all.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.action == Action::Continue
    }

    /// Raise the action to at least `floor`, keeping the reason.
    #[must_use]
    pub fn escalate_to(self, floor: Action) -> Self {
        Self {
            action: self.action.max(floor),
            reason: self.reason,
        }
    }

    /// The more severe of two signals. On equal severity `self` wins, so the
    /// first reason observed at a given level is the one kept.
    #[must_use]
    pub fn worst(self, other: ErrorSignal) -> Self {
        if other.action > self.action {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for ErrorSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?})", self.action, self.reason)
    }
}

// =============================================================================
// EVENT STATUS
// =============================================================================

/// Scope at which a caller asks whether processing may go on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Chain,
    Event,
    Job,
}

/// Running worst-of-event signal.
///
/// Reset at event entry, then only ever raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventStatus {
    worst: ErrorSignal,
}

impl EventStatus {
    /// A fresh status at `Continue`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything observed so far.
    pub fn reset(&mut self) {
        self.worst = ErrorSignal::OK;
    }

    /// Fold a signal into the running maximum.
    pub fn fold(&mut self, signal: ErrorSignal) {
        self.worst = self.worst.worst(signal);
    }

    /// The worst signal observed since the last reset.
    #[must_use]
    pub fn current(&self) -> ErrorSignal {
        self.worst
    }

    /// Fold `signal` and report whether processing may continue at `scope`.
    ///
    /// At chain scope the just-returned signal decides for the chain itself,
    /// while the running status still stops every chain once the event is
    /// aborted.
    pub fn can_continue(&mut self, signal: ErrorSignal, scope: Scope) -> bool {
        self.fold(signal);
        match scope {
            Scope::Chain => {
                signal.action < Action::AbortChain && self.worst.action < Action::AbortEvent
            }
            Scope::Event => self.worst.action < Action::AbortEvent,
            Scope::Job => self.worst.action < Action::AbortJob,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
