//! # Execution Ordering
//!
//! Pluggable reordering of the active chains, applied once per pass before
//! the first step. Running cheap or very selective chains first maximizes
//! what early rejection saves, since later chains then find shared features
//! already cached.
//!
//! Policies are pure: they see the chains, return them in a new order, and
//! touch nothing else.

use crate::chain::Chain;

/// A reordering policy over the active chains.
pub trait OrderingPolicy: Send + Sync {
    /// Return `active` in execution order.
    ///
    /// A policy that drops or duplicates chains is tolerated: the engine
    /// runs every active chain exactly once, appending any the policy left
    /// out in menu order.
    fn apply<'c>(&self, active: Vec<&'c Chain>) -> Vec<&'c Chain>;
}

/// Keep the menu order.
#[derive(Debug, Clone, Copy, Default)]
pub struct MenuOrder;

impl OrderingPolicy for MenuOrder {
    fn apply<'c>(&self, active: Vec<&'c Chain>) -> Vec<&'c Chain> {
        active
    }
}

/// Sort by the static configured priority.
///
/// The sort is stable, so chains of equal priority keep their menu order.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityOrdering {
    pub descending: bool,
}

impl PriorityOrdering {
    /// Lowest priority value first.
    #[must_use]
    pub fn ascending() -> Self {
        Self { descending: false }
    }

    /// Highest priority value first.
    #[must_use]
    pub fn descending() -> Self {
        Self { descending: true }
    }
}

impl OrderingPolicy for PriorityOrdering {
    fn apply<'c>(&self, mut active: Vec<&'c Chain>) -> Vec<&'c Chain> {
        if self.descending {
            active.sort_by(|a, b| b.priority.cmp(&a.priority));
        } else {
            active.sort_by_key(|c| c.priority);
        }
        active
    }
}

// =============================================================================
// TESTS
// =============================================================================
