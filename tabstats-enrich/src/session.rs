//! Session root
//!
//! A [`Session`] owns everything with per-session lifetime: the enrichment
//! cache, the fetch orchestrator, the discovery consumer, the report
//! dispatcher and the two credentials. The host creates one per session
//! (world join) and calls [`Session::end`] when leaving.

use std::sync::Arc;
use tabstats_common::config::{
    resolve_api_key, EnrichmentSettings, SharedCredential, TomlConfig, PROFILE_KEY_ENV,
    REPORT_KEY_ENV,
};
use tabstats_common::events::{EnrichmentEvent, EventBus};
use tabstats_common::Identifier;
use tokio::sync::broadcast;
use tracing::info;

use crate::discovery::{DiscoveryConsumer, TickSummary};
use crate::error::FetchResult;
use crate::models::{Candidate, EnrichedRecord};
use crate::orchestrator::{FetchOrchestrator, RetryPolicy};
use crate::pool::WorkerPool;
use crate::reports::{ReportDispatcher, ReportTag};
use crate::services::{ProfileClient, ProfileSource, ReportClient, ReportSource};
use crate::world::World;

pub struct Session {
    world: Arc<World>,
    orchestrator: Arc<FetchOrchestrator>,
    discovery: DiscoveryConsumer,
    reports: Arc<ReportDispatcher>,
    profile_credential: SharedCredential,
    report_credential: SharedCredential,
    events: EventBus,
}

impl Session {
    /// Build a session around the given remote sources.
    ///
    /// Must be called inside a tokio runtime. Background work runs on that
    /// runtime, so [`on_tick`](Self::on_tick) may be driven from a plain
    /// host thread.
    pub fn new(
        settings: &EnrichmentSettings,
        profile_credential: SharedCredential,
        report_credential: SharedCredential,
        profile_source: Arc<dyn ProfileSource>,
        report_source: Arc<dyn ReportSource>,
    ) -> Self {
        let events = EventBus::default();
        let world = Arc::new(World::new(
            settings.cache_ceiling,
            settings.durable_after_ticks,
        ));
        let orchestrator = Arc::new(FetchOrchestrator::new(
            Arc::clone(&world),
            profile_source,
            WorkerPool::new(settings.worker_threads),
            RetryPolicy::with_max_attempts(settings.max_attempts),
            events.clone(),
        ));
        let discovery =
            DiscoveryConsumer::new(Arc::clone(&world), Arc::clone(&orchestrator), events.clone());
        let reports = Arc::new(ReportDispatcher::new(
            report_source,
            report_credential.clone(),
            events.clone(),
        ));

        Self {
            world,
            orchestrator,
            discovery,
            reports,
            profile_credential,
            report_credential,
            events,
        }
    }

    /// Build a session backed by the real HTTP clients.
    ///
    /// API keys are resolved from the environment first, then the config.
    pub fn from_config(config: &TomlConfig) -> FetchResult<Self> {
        let profile_credential = SharedCredential::new(resolve_api_key(
            PROFILE_KEY_ENV,
            config.profile_api_key.as_deref(),
        ));
        let report_credential = SharedCredential::new(resolve_api_key(
            REPORT_KEY_ENV,
            config.report_api_key.as_deref(),
        ));

        let profile_client = ProfileClient::new(&config.enrichment, profile_credential.clone())?;
        let report_client = ReportClient::new(&config.enrichment)?;

        let session = Self::new(
            &config.enrichment,
            profile_credential,
            report_credential,
            Arc::new(profile_client),
            Arc::new(report_client),
        );
        session.set_enabled(config.enabled);
        Ok(session)
    }

    /// Mark the session start; opens the report batching window
    pub fn start(&self) {
        info!(
            profile_key = self.profile_credential.is_configured(),
            report_key = self.report_credential.is_configured(),
            "Enrichment session started"
        );
        self.reports.start_window();
    }

    pub fn on_tick(&self, candidates: &[Candidate]) -> TickSummary {
        self.discovery.on_tick(candidates)
    }

    pub fn get(&self, id: Identifier) -> Option<Arc<EnrichedRecord>> {
        self.world.get(id)
    }

    pub fn get_by_identity(&self, id: Identifier, fallback_names: &[&str]) -> Option<Arc<EnrichedRecord>> {
        self.world.get_by_identity(id, fallback_names)
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<EnrichedRecord>> {
        self.world.get_by_name(name)
    }

    /// Resolve the report tag for an identity (see [`ReportDispatcher::lookup`])
    pub async fn report_tag(&self, identity: &str) -> Option<Arc<ReportTag>> {
        self.reports.lookup(identity).await
    }

    /// Replace the profile key.
    ///
    /// A changed key clears the cache and lifts a credential halt. Returns
    /// true when the key changed.
    pub fn set_profile_credential(&self, key: &str) -> bool {
        if !self.profile_credential.set(key) {
            return false;
        }
        info!("Profile API key changed, clearing enrichment cache");
        self.clear_world();
        self.orchestrator.resume();
        true
    }

    /// Replace the report key; a changed key drops cached report tags
    pub fn set_report_credential(&self, key: &str) -> bool {
        if !self.report_credential.set(key) {
            return false;
        }
        info!("Report API key changed, clearing report tags");
        self.reports.clear();
        self.reports.start_window();
        true
    }

    pub fn set_enabled(&self, enabled: bool) {
        info!(enabled, "Enrichment toggled");
        self.orchestrator.set_enabled(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.orchestrator.is_enabled()
    }

    pub fn is_halted(&self) -> bool {
        self.orchestrator.is_halted()
    }

    /// Reset per-tick bookkeeping, keeping every cached record
    pub fn rerender(&self) {
        self.world.rerender();
    }

    /// Forget one identity so it is fetched again on its next sighting
    pub fn recheck(&self, id: Identifier) -> bool {
        self.world.recheck(id)
    }

    /// Forget every identity
    pub fn recheck_all(&self) {
        self.clear_world();
    }

    /// Tear down per-session state
    pub fn end(&self) {
        info!(cached = self.world.len(), "Enrichment session ended");
        self.clear_world();
        self.reports.clear();
    }

    /// Wait until every in-flight fetch chain has terminated
    pub async fn wait_idle(&self) {
        self.orchestrator.wait_idle().await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EnrichmentEvent> {
        self.events.subscribe()
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn reports(&self) -> &Arc<ReportDispatcher> {
        &self.reports
    }

    pub fn profile_credential(&self) -> &SharedCredential {
        &self.profile_credential
    }

    fn clear_world(&self) {
        self.world.clear();
        self.events.emit_lossy(EnrichmentEvent::CacheCleared {
            timestamp: chrono::Utc::now(),
        });
    }
}
