//! # Feature Graph
//!
//! Per-event arena of memoized intermediate results.
//!
//! Every result is keyed by `(FeatureType, RoiKey)` and stored at most once
//! per event. A production that failed is stored too, as a tombstone carrying
//! its [`ErrorSignal`], so no algorithm is asked twice for the same key within
//! one event whether it succeeded or not.
//!
//! Nodes are never removed one by one: [`FeatureGraph::clear`] drops the whole
//! arena at the end of the event.

use crate::signal::ErrorSignal;
use crate::types::{FeatureType, Payload, RoiKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// FEATURE NODE
// =============================================================================

/// One computed (or seeded) intermediate result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureNode {
    #[serde(rename = "type")]
    pub feature_type: FeatureType,
    pub roi: RoiKey,
    #[serde(default)]
    pub payload: Payload,
}

impl FeatureNode {
    /// Create a new node.
    #[must_use]
    pub fn new(feature_type: FeatureType, roi: RoiKey, payload: Payload) -> Self {
        Self {
            feature_type,
            roi,
            payload,
        }
    }
}

/// Index of a slot in the arena. Only valid for the event that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(usize);

#[derive(Debug, Clone)]
enum Slot {
    Produced(FeatureNode),
    Failed(ErrorSignal),
}

// =============================================================================
// FEATURE GRAPH
// =============================================================================

/// Memoization arena for the current event.
#[derive(Debug, Default)]
pub struct FeatureGraph {
    slots: Vec<Slot>,
    index: BTreeMap<FeatureType, BTreeMap<RoiKey, SlotId>>,
    cache_hits: u64,
}

impl FeatureGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every node and tombstone. Counters survive.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }

    /// Number of stored entries, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if nothing has been stored this event.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Check if an entry (success or tombstone) exists for the key.
    #[must_use]
    pub fn contains(&self, feature_type: &FeatureType, roi: RoiKey) -> bool {
        self.slot_id(feature_type, roi).is_some()
    }

    /// Look up a cached entry, counting a cache hit when one is found.
    ///
    /// Returns `None` when nothing is cached, `Some(Ok(slot))` for a stored
    /// node and `Some(Err(signal))` for a tombstone.
    pub fn lookup(
        &mut self,
        feature_type: &FeatureType,
        roi: RoiKey,
    ) -> Option<Result<SlotId, ErrorSignal>> {
        let id = self.slot_id(feature_type, roi)?;
        self.cache_hits = self.cache_hits.saturating_add(1);
        match &self.slots[id.0] {
            Slot::Produced(_) => Some(Ok(id)),
            Slot::Failed(signal) => Some(Err(*signal)),
        }
    }

    /// Store a node. If the key is already taken the existing entry wins and
    /// its id is returned.
    pub fn insert(&mut self, node: FeatureNode) -> SlotId {
        if let Some(existing) = self.slot_id(&node.feature_type, node.roi) {
            return existing;
        }
        let id = SlotId(self.slots.len());
        self.index
            .entry(node.feature_type.clone())
            .or_default()
            .insert(node.roi, id);
        self.slots.push(Slot::Produced(node));
        id
    }

    /// Store a tombstone for a failed production and return its signal.
    pub fn insert_failure(
        &mut self,
        feature_type: FeatureType,
        roi: RoiKey,
        signal: ErrorSignal,
    ) -> ErrorSignal {
        if self.slot_id(&feature_type, roi).is_some() {
            return signal;
        }
        let id = SlotId(self.slots.len());
        self.index.entry(feature_type).or_default().insert(roi, id);
        self.slots.push(Slot::Failed(signal));
        signal
    }

    /// Resolve a slot to its node. Tombstones resolve to `None`.
    #[must_use]
    pub fn node(&self, id: SlotId) -> Option<&FeatureNode> {
        match self.slots.get(id.0) {
            Some(Slot::Produced(node)) => Some(node),
            _ => None,
        }
    }

    /// Get a stored node by key without touching the hit counter.
    #[must_use]
    pub fn get(&self, feature_type: &FeatureType, roi: RoiKey) -> Option<&FeatureNode> {
        self.slot_id(feature_type, roi).and_then(|id| self.node(id))
    }

    /// Total cache hits since the graph was created.
    #[must_use]
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    fn slot_id(&self, feature_type: &FeatureType, roi: RoiKey) -> Option<SlotId> {
        self.index
            .get(feature_type)
            .and_then(|by_roi| by_roi.get(&roi))
            .copied()
    }
}

// =============================================================================
// TESTS
// =============================================================================
