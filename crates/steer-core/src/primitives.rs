//! # Engine Primitives
//!
//! Compiled-in defaults for the steering engine. Every value here can be
//! overridden through [`EngineConfig`](crate::engine::EngineConfig); these are
//! only what an engine gets when nobody says otherwise.

/// Default soft budget per event, in milliseconds.
///
/// - Checked at the top of every step iteration.
/// - Expiry aborts the event; the next event proceeds.
pub const DEFAULT_SOFT_TIMEOUT_MS: u64 = 1_000;

/// Default hard budget per event, in milliseconds.
///
/// - Enforced by the watchdog, observed at safe-points.
/// - Expiry aborts the job.
pub const DEFAULT_HARD_TIMEOUT_MS: u64 = 5_000;

/// Default seed of the built-in counter scaler.
pub const DEFAULT_PRESCALE_SEED: u64 = 0x5EED;

/// Default number of rois that must survive a step.
pub const DEFAULT_MULTIPLICITY: usize = 1;

/// Default prescale factor: every event is accepted.
///
/// A factor of 0 disables the chain.
pub const DEFAULT_PRESCALE: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_budget_outlasts_soft() {
        assert!(DEFAULT_HARD_TIMEOUT_MS > DEFAULT_SOFT_TIMEOUT_MS);
    }

    #[test]
    fn defaults_keep_chains_running() {
        assert_eq!(DEFAULT_PRESCALE, 1);
        assert_eq!(DEFAULT_MULTIPLICITY, 1);
    }
}
