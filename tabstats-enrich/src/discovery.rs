//! Per-tick discovery entry point
//!
//! Called once per host tick with the entities currently visible. Cheap for
//! cached identities; dispatches at most one fetch chain per identity; runs
//! the eviction sweep at the end of every tick.

use std::collections::HashSet;
use std::sync::Arc;
use tabstats_common::events::{EnrichmentEvent, EventBus};
use tabstats_common::identity::passes_discovery_guard;
use tabstats_common::{Identifier, IdentityKind};
use tracing::{debug, trace};

use crate::models::Candidate;
use crate::orchestrator::FetchOrchestrator;
use crate::world::World;

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Candidates that passed the guards and classification
    pub observed: usize,
    /// Already cached
    pub cache_hits: usize,
    /// New fetch chains started
    pub dispatched: usize,
    /// Filtered, rejected, in flight, or held back while disabled/halted
    pub skipped: usize,
    /// Entries removed by the eviction sweep
    pub evicted: usize,
}

pub struct DiscoveryConsumer {
    world: Arc<World>,
    orchestrator: Arc<FetchOrchestrator>,
    events: EventBus,
}

impl DiscoveryConsumer {
    pub fn new(world: Arc<World>, orchestrator: Arc<FetchOrchestrator>, events: EventBus) -> Self {
        Self {
            world,
            orchestrator,
            events,
        }
    }

    /// Process one tick's worth of candidates.
    ///
    /// Re-delivering the same candidates is harmless: cached and in-flight
    /// identities are skipped.
    pub fn on_tick(&self, candidates: &[Candidate]) -> TickSummary {
        let mut summary = TickSummary::default();
        let mut visible: HashSet<Identifier> = HashSet::with_capacity(candidates.len());

        for candidate in candidates {
            if !passes_discovery_guard(&candidate.name, candidate.display_label.as_deref()) {
                trace!(name = %candidate.name, "Candidate failed discovery guard");
                summary.skipped += 1;
                continue;
            }

            let id = candidate.id;
            let kind = id.kind();
            if kind == IdentityKind::Ignored {
                summary.skipped += 1;
                continue;
            }

            summary.observed += 1;
            if visible.insert(id) {
                self.world.record_sighting(id);
            }

            if self.world.contains(id) {
                summary.cache_hits += 1;
                continue;
            }

            if self.world.is_rejected(id)
                || !self.orchestrator.is_enabled()
                || (kind != IdentityKind::Nicked && self.orchestrator.is_halted())
            {
                summary.skipped += 1;
                continue;
            }

            if !self.world.try_begin_assembly(id) {
                summary.skipped += 1;
                continue;
            }

            // A chain may have committed between the cache check and the claim
            if self.world.contains(id) {
                self.world.abandon(id);
                summary.cache_hits += 1;
                continue;
            }

            debug!(id = %id, name = %candidate.name, kind = ?kind, "Dispatching enrichment");
            self.orchestrator.enrich(candidate.clone());
            summary.dispatched += 1;
        }

        summary.evicted = self.world.evict_if_oversize(&visible);
        if summary.evicted > 0 {
            self.events.emit_lossy(EnrichmentEvent::CacheEvicted {
                evicted: summary.evicted,
                retained: self.world.len(),
                timestamp: chrono::Utc::now(),
            });
        }

        summary
    }
}
