//! # External Collaborators
//!
//! Everything the engine needs from the outside world arrives through the
//! traits in this module. The engine never reaches for a collaborator on its
//! own: the caller lends them for the duration of one `run()` through
//! [`Services`].
//!
//! | Collaborator | Called |
//! |---|---|
//! | [`Activation`] | once per event, before any step |
//! | [`Scaler`] | once per activated chain (or group master) per event |
//! | [`ResourceFetcher`] | at most once per step index |
//! | [`EventAcceptSink`] | at most once per event |
//! | [`ResultConsumer`] | once per event unless the job is aborted |

use crate::chain::ChainVerdict;
use crate::feature::FeatureNode;
use crate::menu::Menu;
use crate::prescale::Scaler;
use crate::signal::ErrorSignal;
use crate::types::{ChainId, Event, EventIdentity, FeatureType, ResourceId, RoiKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// ACTIVATION
// =============================================================================

/// A chain the activation wants run, with its seed rois.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveChain {
    pub chain: ChainId,
    pub rois: Vec<RoiKey>,
}

/// Output of the activation step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationResult {
    pub chains: Vec<ActiveChain>,
    /// Seed features inserted into the graph before the first step.
    pub seeds: Vec<FeatureNode>,
}

/// Decides which chains an event activates.
pub trait Activation {
    /// Returns the active chains and their seeds. An error seeds the event
    /// status as-is.
    fn activate(&mut self, event: &Event) -> Result<ActivationResult, ErrorSignal>;
}

/// Activation driven by the seeds carried in the event.
///
/// A seeded chain is active at every roi where the event carries a seed of
/// its type; a chain without a seed type is always active at
/// [`RoiKey::FULL_SCAN`].
#[derive(Debug, Clone, Default)]
pub struct SeedActivation {
    chains: Vec<(ChainId, Option<FeatureType>)>,
}

impl SeedActivation {
    /// Activation covering every chain of `menu`.
    #[must_use]
    pub fn from_menu(menu: &Menu) -> Self {
        Self {
            chains: menu
                .chains
                .iter()
                .map(|c| (ChainId(c.counter), c.seed.clone()))
                .collect(),
        }
    }
}

impl Activation for SeedActivation {
    fn activate(&mut self, event: &Event) -> Result<ActivationResult, ErrorSignal> {
        let mut rois_by_type: BTreeMap<&FeatureType, BTreeSet<RoiKey>> = BTreeMap::new();
        for seed in &event.seeds {
            rois_by_type
                .entry(&seed.feature_type)
                .or_default()
                .insert(seed.roi);
        }

        let chains = self
            .chains
            .iter()
            .filter_map(|(chain, seed)| {
                let rois: Vec<RoiKey> = match seed {
                    None => vec![RoiKey::FULL_SCAN],
                    Some(ty) => rois_by_type
                        .get(ty)
                        .map(|set| set.iter().copied().collect())
                        .unwrap_or_default(),
                };
                (!rois.is_empty()).then(|| ActiveChain {
                    chain: *chain,
                    rois,
                })
            })
            .collect();

        Ok(ActivationResult {
            chains,
            seeds: event.seeds.clone(),
        })
    }
}

// =============================================================================
// FETCH, ACCEPT, FINALIZE
// =============================================================================

/// Bulk data-fetch transport.
pub trait ResourceFetcher {
    /// Fetch every id in `ids` in one request.
    fn request(&mut self, ids: &BTreeSet<ResourceId>) -> Result<(), ErrorSignal>;
}

/// Notified once per event, the first time any first-pass chain passes.
pub trait EventAcceptSink {
    fn trigger(&mut self, step_index: usize);
}

/// Everything known about an event once steering is over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub identity: Option<EventIdentity>,
    /// Worst signal of the event.
    pub status: ErrorSignal,
    /// At least one chain passed in the first pass.
    pub accepted: bool,
    /// Step index at which the accept trigger fired.
    pub accept_step: Option<usize>,
    /// Verdicts in menu order.
    pub verdicts: Vec<ChainVerdict>,
}

/// Downstream consumer of event records.
pub trait ResultConsumer {
    /// Take the record. The returned signal is folded into the event status.
    fn finalize(&mut self, record: &EventRecord) -> ErrorSignal;
}

// =============================================================================
// SERVICES
// =============================================================================

/// Collaborators lent to the engine for one `run()`.
pub struct Services<'a> {
    pub activation: &'a mut dyn Activation,
    pub scaler: &'a mut dyn Scaler,
    pub fetcher: &'a mut dyn ResourceFetcher,
    pub accept: &'a mut dyn EventAcceptSink,
    pub consumer: &'a mut dyn ResultConsumer,
}

// =============================================================================
// TESTS
// =============================================================================
