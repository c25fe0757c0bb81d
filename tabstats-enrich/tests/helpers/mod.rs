//! Test Helper Utilities
//!
//! Shared utilities for testing tabstats-enrich

#![allow(dead_code)]

pub mod sources;

// Re-export commonly used items
pub use sources::{player_json, ScriptedProfileSource, StubReportSource};

use std::sync::Arc;
use tabstats_common::events::EventBus;
use tabstats_common::Identifier;
use tabstats_enrich::pool::WorkerPool;
use tabstats_enrich::{Candidate, DiscoveryConsumer, FetchOrchestrator, RetryPolicy, World};

/// World, orchestrator and discovery wired together around one source
pub struct Pipeline {
    pub world: Arc<World>,
    pub orchestrator: Arc<FetchOrchestrator>,
    pub discovery: Arc<DiscoveryConsumer>,
    pub events: EventBus,
}

impl Pipeline {
    pub fn new(source: Arc<ScriptedProfileSource>) -> Self {
        Self::with_world(source, World::default())
    }

    pub fn with_world(source: Arc<ScriptedProfileSource>, world: World) -> Self {
        Self::build(source, world, WorkerPool::new(4))
    }

    pub fn with_pool(source: Arc<ScriptedProfileSource>, pool: WorkerPool) -> Self {
        Self::build(source, World::default(), pool)
    }

    fn build(source: Arc<ScriptedProfileSource>, world: World, pool: WorkerPool) -> Self {
        let events = EventBus::new(64);
        let world = Arc::new(world);
        let orchestrator = Arc::new(FetchOrchestrator::new(
            Arc::clone(&world),
            source,
            pool,
            RetryPolicy::default(),
            events.clone(),
        ));
        let discovery = Arc::new(DiscoveryConsumer::new(
            Arc::clone(&world),
            Arc::clone(&orchestrator),
            events.clone(),
        ));
        Self {
            world,
            orchestrator,
            discovery,
            events,
        }
    }

    /// Run one tick and wait for every chain it started
    pub async fn tick_and_settle(&self, candidates: &[Candidate]) {
        self.discovery.on_tick(candidates);
        self.orchestrator.wait_idle().await;
    }
}

/// Real-account identifier (provenance tag 4)
pub fn real_id(n: u128) -> Identifier {
    Identifier::from_parts(n, 4)
}

/// Ephemeral identifier (provenance tag 2)
pub fn ephemeral_id(n: u128) -> Identifier {
    Identifier::from_parts(n, 2)
}

/// Disguised identifier (provenance tag 1)
pub fn nicked_id(n: u128) -> Identifier {
    Identifier::from_parts(n, 1)
}
