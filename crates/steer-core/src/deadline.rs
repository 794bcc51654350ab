//! # Deadlines
//!
//! Two independent wall-clock budgets start at event entry:
//!
//! - **Soft**: checked cooperatively at the top of every step iteration.
//!   Expiry aborts the event.
//! - **Hard**: enforced by a [`Watchdog`] that flips a [`CancellationToken`].
//!   The engine observes the token at its safe-points only (loop top, after
//!   every algorithm invocation, after every resource flush) and aborts the
//!   job when it is set.
//!
//! Neither budget is extended mid-event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// =============================================================================
// CANCELLATION TOKEN
// =============================================================================

/// Shared "killed" flag set by a watchdog and read at safe-points.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    killed: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create an unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the token as killed.
    pub fn cancel(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    /// Check if the token has been killed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Clear the flag for the next event.
    pub fn clear(&self) {
        self.killed.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// EVENT DEADLINES
// =============================================================================

/// Budgets measured from event entry.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    started: Instant,
    soft: Option<Duration>,
    hard: Option<Duration>,
}

impl Deadlines {
    /// Start both clocks now. `None` disables a budget.
    #[must_use]
    pub fn start(soft: Option<Duration>, hard: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            soft,
            hard,
        }
    }

    /// Time since event entry.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Check if the soft budget is spent.
    #[must_use]
    pub fn soft_expired(&self) -> bool {
        self.soft.is_some_and(|budget| self.elapsed() >= budget)
    }

    /// Check if the hard budget is spent. Used as a fallback when no
    /// watchdog is installed.
    #[must_use]
    pub fn hard_expired(&self) -> bool {
        self.hard.is_some_and(|budget| self.elapsed() >= budget)
    }
}

// =============================================================================
// WATCHDOG
// =============================================================================

/// Preemptive enforcer of the hard deadline.
pub trait Watchdog: Send {
    /// Start counting `budget`; cancel `token` when it runs out.
    fn arm(&mut self, budget: Duration, token: CancellationToken);

    /// Stop counting. A token already cancelled stays cancelled.
    fn disarm(&mut self);
}

#[derive(Debug, Default)]
struct TimerState {
    armed: Option<(Instant, CancellationToken)>,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

/// Watchdog backed by one background thread.
#[derive(Debug)]
pub struct TimerWatchdog {
    shared: Arc<TimerShared>,
    handle: Option<JoinHandle<()>>,
}

impl TimerWatchdog {
    /// Spawn the watchdog thread.
    pub fn spawn() -> std::io::Result<Self> {
        let shared = Arc::new(TimerShared::default());
        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("steer-watchdog".to_string())
            .spawn(move || watch(&worker))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    fn update(&self, f: impl FnOnce(&mut TimerState)) {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
        self.shared.wake.notify_all();
    }
}

impl Watchdog for TimerWatchdog {
    fn arm(&mut self, budget: Duration, token: CancellationToken) {
        let deadline = Instant::now() + budget;
        self.update(|state| state.armed = Some((deadline, token)));
    }

    fn disarm(&mut self) {
        self.update(|state| state.armed = None);
    }
}

impl Drop for TimerWatchdog {
    fn drop(&mut self) {
        self.update(|state| state.shutdown = true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn watch(shared: &TimerShared) {
    let mut state = shared
        .state
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    loop {
        if state.shutdown {
            return;
        }
        let armed = state.armed.as_ref().map(|(at, _)| *at);
        match armed {
            None => {
                state = shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    if let Some((_, token)) = state.armed.take() {
                        token.cancel();
                    }
                    continue;
                }
                let (guard, _) = shared
                    .wake
                    .wait_timeout(state, deadline.saturating_duration_since(now))
                    .unwrap_or_else(PoisonError::into_inner);
                state = guard;
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
        token.clear();
        assert!(!observer.is_cancelled());
    }

    #[test]
    fn disabled_budgets_never_expire() {
        let deadlines = Deadlines::start(None, None);
        assert!(!deadlines.soft_expired());
        assert!(!deadlines.hard_expired());
    }

    #[test]
    fn zero_budget_expires_immediately() {
        let deadlines = Deadlines::start(Some(Duration::ZERO), Some(Duration::ZERO));
        assert!(deadlines.soft_expired());
        assert!(deadlines.hard_expired());
    }

    #[test]
    fn watchdog_cancels_after_budget() {
        let mut watchdog = TimerWatchdog::spawn().expect("spawn");
        let token = CancellationToken::new();
        watchdog.arm(Duration::from_millis(5), token.clone());

        let started = Instant::now();
        while !token.is_cancelled() && started.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(token.is_cancelled());
    }

    #[test]
    fn disarmed_watchdog_does_not_fire() {
        let mut watchdog = TimerWatchdog::spawn().expect("spawn");
        let token = CancellationToken::new();
        watchdog.arm(Duration::from_millis(20), token.clone());
        watchdog.disarm();
        std::thread::sleep(Duration::from_millis(60));
        assert!(!token.is_cancelled());
    }
}
