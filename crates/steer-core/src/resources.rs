//! # Resource Batching
//!
//! Before each step index the engine collects the data every running chain
//! will need for that step and issues one bulk request. A resource already
//! fetched earlier in the event is never requested again.

use crate::services::ResourceFetcher;
use crate::signal::{Action, ErrorSignal};
use crate::types::ResourceId;
use std::collections::BTreeSet;

/// Per-event accumulator of resource requirements.
#[derive(Debug, Clone, Default)]
pub struct ResourceRequestBatcher {
    pending: BTreeSet<ResourceId>,
    fetched: BTreeSet<ResourceId>,
    requests: u64,
}

impl ResourceRequestBatcher {
    /// Create an empty batcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `ids`, skipping anything already fetched this event. Returns
    /// how many of them still need fetching.
    pub fn add(&mut self, ids: impl IntoIterator<Item = ResourceId>) -> usize {
        let mut needed = 0;
        for id in ids {
            if !self.fetched.contains(&id) {
                self.pending.insert(id);
                needed += 1;
            }
        }
        needed
    }

    /// Number of ids waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of ids fetched so far this event.
    #[must_use]
    pub fn fetched(&self) -> usize {
        self.fetched.len()
    }

    /// Bulk requests issued since construction.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Send everything pending in one request.
    ///
    /// Nothing is sent when nothing is pending. A failed request is raised
    /// to at least `AbortChain`; its ids stay unfetched.
    pub fn flush(&mut self, fetcher: &mut dyn ResourceFetcher) -> Result<usize, ErrorSignal> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::take(&mut self.pending);
        self.requests = self.requests.saturating_add(1);
        fetcher
            .request(&batch)
            .map_err(|signal| signal.escalate_to(Action::AbortChain))?;
        let count = batch.len();
        self.fetched.extend(batch);
        Ok(count)
    }

    /// Forget the event: pending and fetched sets are emptied.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.fetched.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================
