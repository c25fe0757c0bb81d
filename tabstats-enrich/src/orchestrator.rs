//! Fetch orchestrator
//!
//! Drives one fetch chain per dispatched candidate. A chain is a sequence
//! of attempts for a single identity; each attempt runs on the worker pool
//! and ends in exactly one of:
//!
//! - a terminal commit (enriched, nicked, resolved from an existing record,
//!   or bare after the retry budget ran out)
//! - a terminal abandon (disabled, rejected credential, ephemeral identity
//!   without a profile)
//! - a retry, scheduled on a timer that holds no worker permit
//!
//! Failures never propagate out of a chain.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tabstats_common::events::{AbandonReason, CommitKind, EnrichmentEvent, EventBus};
use tabstats_common::{Identifier, IdentityKind};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::games::{default_modules, extract_all, GameModule};
use crate::models::{rank_label_from_profile, Candidate, EnrichedRecord};
use crate::pool::WorkerPool;
use crate::services::ProfileSource;
use crate::world::World;

/// Retry schedule for a fetch chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts below this number may be retried
    pub max_attempts: u32,
    /// Base delay when every caller is throttled
    pub global_throttle_base: Duration,
    /// Base delay when only this key is throttled
    pub key_throttle_base: Duration,
    /// Base of the exponential backoff for other failures
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            global_throttle_base: Duration::from_millis(5_000),
            key_throttle_base: Duration::from_millis(2_000),
            backoff_base: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay before retrying after `error` on attempt `attempt` (0-based).
    ///
    /// `None` means the budget is spent. Throttling scales linearly with the
    /// attempt number; everything else backs off exponentially, with the
    /// first retry immediate.
    pub fn delay_for(&self, attempt: u32, error: &FetchError) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        match error {
            FetchError::Throttled { global } => {
                let base = if *global {
                    self.global_throttle_base
                } else {
                    self.key_throttle_base
                };
                Some(base * (attempt + 1))
            }
            _ => Some(self.backoff(attempt)),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2f64.powi(attempt as i32 - 1);
        let millis = (self.backoff_base.as_millis() as f64 * factor).round();
        Duration::from_millis(millis as u64)
    }
}

enum Step {
    Done,
    Retry(Duration),
}

/// Dispatches and retries profile fetches, writing results into the [`World`]
pub struct FetchOrchestrator {
    world: Arc<World>,
    source: Arc<dyn ProfileSource>,
    modules: Vec<Box<dyn GameModule>>,
    pool: WorkerPool,
    policy: RetryPolicy,
    events: EventBus,
    enabled: AtomicBool,
    halted: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    runtime: Handle,
}

impl FetchOrchestrator {
    /// Must be called inside a tokio runtime. Chains run on that runtime,
    /// so [`enrich`](Self::enrich) may later be called from any thread.
    pub fn new(
        world: Arc<World>,
        source: Arc<dyn ProfileSource>,
        pool: WorkerPool,
        policy: RetryPolicy,
        events: EventBus,
    ) -> Self {
        Self {
            world,
            source,
            modules: default_modules(),
            pool,
            policy,
            events,
            enabled: AtomicBool::new(true),
            halted: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            runtime: Handle::current(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// True after the profile service rejected the credential
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Lift a credential halt
    pub fn resume(&self) {
        if self.halted.swap(false, Ordering::AcqRel) {
            info!("Profile fetches resumed");
        }
    }

    /// Number of chains not yet terminated
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait until every dispatched chain has terminated
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Start a fetch chain for a candidate.
    ///
    /// The caller must already hold the assembly claim for `candidate.id`.
    pub fn enrich(self: &Arc<Self>, candidate: Candidate) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            this.run_chain(candidate).await;
            if this.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                this.idle.notify_waiters();
            }
        });
    }

    async fn run_chain(&self, candidate: Candidate) {
        let mut attempt = 0;
        loop {
            let step = match self.pool.execute(self.attempt(&candidate, attempt)).await {
                Some(step) => step,
                None => {
                    // Pool shut down underneath the chain
                    self.world.abandon(candidate.id);
                    return;
                }
            };
            match step {
                Step::Done => return,
                Step::Retry(delay) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, candidate: &Candidate, attempt: u32) -> Step {
        let id = candidate.id;

        if !self.is_enabled() {
            self.abandon(id, AbandonReason::Disabled);
            return Step::Done;
        }

        let mut names: Vec<&str> = Vec::with_capacity(2);
        if let Some(label) = candidate.display_label.as_deref() {
            names.push(label);
        }
        names.push(candidate.name.as_str());

        if id.kind() == IdentityKind::Nicked {
            let record = EnrichedRecord::nicked(id, candidate.name.as_str());
            self.commit(id, record, &names, CommitKind::Nicked, attempt);
            return Step::Done;
        }

        if let Some(existing) = self.world.get_by_identity(id, &names) {
            let record = existing.with_id(id);
            self.commit(id, record, &names, CommitKind::Resolved, attempt);
            return Step::Done;
        }

        if self.is_halted() {
            self.abandon(id, AbandonReason::InvalidCredential);
            return Step::Done;
        }

        debug!(id = %id, name = %candidate.name, attempt, "Fetching profile");

        let error = match self.source.fetch_profile(id).await {
            Ok(player) => {
                let record = self.build_record(candidate, &player);
                self.commit(id, record, &names, CommitKind::Enriched, attempt);
                return Step::Done;
            }
            Err(error) => error,
        };

        match error {
            FetchError::InvalidCredential => {
                if !self.halted.swap(true, Ordering::AcqRel) {
                    warn!("Profile service rejected the API key; halting profile fetches");
                    self.events.emit_lossy(EnrichmentEvent::CredentialRejected {
                        timestamp: chrono::Utc::now(),
                    });
                }
                self.abandon(id, AbandonReason::InvalidCredential);
                Step::Done
            }
            FetchError::ProfileNotFound if id.kind() == IdentityKind::Ephemeral => {
                self.world.reject(id);
                self.abandon(id, AbandonReason::EphemeralWithoutProfile);
                Step::Done
            }
            error => match self.policy.delay_for(attempt, &error) {
                Some(delay) => {
                    if matches!(error, FetchError::Throttled { .. }) {
                        warn!(
                            id = %id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Profile fetch throttled, will retry"
                        );
                    } else {
                        debug!(
                            id = %id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Profile fetch failed, will retry"
                        );
                    }
                    Step::Retry(delay)
                }
                None => {
                    warn!(
                        id = %id,
                        attempts = attempt + 1,
                        error = %error,
                        "Retry budget exhausted, caching name only"
                    );
                    let record = EnrichedRecord::bare(id, candidate.name.as_str());
                    self.commit(id, record, &names, CommitKind::Bare, attempt);
                    Step::Done
                }
            },
        }
    }

    fn build_record(&self, candidate: &Candidate, player: &Value) -> EnrichedRecord {
        let display_name = player
            .get("displayname")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(candidate.name.as_str());
        EnrichedRecord::enriched(
            candidate.id,
            display_name,
            rank_label_from_profile(player),
            extract_all(&self.modules, player),
        )
    }

    fn commit(
        &self,
        id: Identifier,
        record: EnrichedRecord,
        names: &[&str],
        kind: CommitKind,
        attempt: u32,
    ) {
        let record = self.world.commit_with_aliases(id, record, names);
        info!(
            id = %id,
            name = %record.display_name(),
            kind = ?kind,
            attempts = attempt + 1,
            "Record committed"
        );
        self.events.emit_lossy(EnrichmentEvent::RecordCommitted {
            id,
            display_name: record.display_name().to_string(),
            kind,
            attempts: attempt + 1,
            timestamp: chrono::Utc::now(),
        });
    }

    fn abandon(&self, id: Identifier, reason: AbandonReason) {
        self.world.abandon(id);
        debug!(id = %id, reason = ?reason, "Fetch abandoned");
        self.events.emit_lossy(EnrichmentEvent::FetchAbandoned {
            id,
            reason,
            timestamp: chrono::Utc::now(),
        });
    }
}
