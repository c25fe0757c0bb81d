//! Batched report-tag lookups
//!
//! Right after joining a session many players appear at once. Lookups made
//! in the first seconds are queued and drained as one multi-identity call
//! after a short debounce. Each join grants a single batched drain; once it
//! has been used, or the window has passed, lookups go out individually.
//!
//! Resolved tags are cached by normalized identity. A failed lookup is not
//! cached, so asking again retries it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tabstats_common::config::SharedCredential;
use tabstats_common::events::{EnrichmentEvent, EventBus};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::FetchResult;
use crate::services::{normalize_identity, Report, ReportSource};

/// Delay between the first queued lookup and the batched call
pub const DEBOUNCE: Duration = Duration::from_millis(150);

/// How long after a join lookups may still be batched
pub const BATCH_WINDOW: Duration = Duration::from_millis(4_000);

/// Tag shown when the service holds no report
pub const NO_RESPONSE_TAG: &str = "§7-";

/// Resolved report state for one identity
#[derive(Debug)]
pub struct ReportTag {
    identity: String,
    report: Option<Report>,
    announced: AtomicBool,
}

impl ReportTag {
    fn new(identity: String, report: Option<Report>) -> Self {
        Self {
            identity,
            report,
            announced: AtomicBool::new(false),
        }
    }

    /// Normalized identity this tag belongs to
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Surfaced report; `None` is a looked-up no-hit
    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    pub fn is_hit(&self) -> bool {
        self.report.is_some()
    }

    /// Compact tab-list label
    pub fn display(&self) -> &'static str {
        self.report
            .as_ref()
            .map(|r| r.kind.short_label())
            .unwrap_or(NO_RESPONSE_TAG)
    }

    pub fn same_payload(&self, report: &Option<Report>) -> bool {
        &self.report == report
    }

    /// Flip `announced` from false to true; true for exactly one caller
    pub fn mark_announced(&self) -> bool {
        self.announced
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_announced(&self) -> bool {
        self.announced.load(Ordering::Acquire)
    }
}

/// Pick the report to surface by fixed category priority
pub fn surfaced_report(reports: &[Report]) -> Option<Report> {
    reports.iter().min_by_key(|r| r.kind.priority()).cloned()
}

/// Tracks the batching window opened by a session join
#[derive(Debug)]
pub struct BatchWindowTracker {
    state: Mutex<WindowState>,
    length: Duration,
}

#[derive(Debug, Default)]
struct WindowState {
    opened_at: Option<Instant>,
    consumed: bool,
}

impl BatchWindowTracker {
    pub fn new(length: Duration) -> Self {
        Self {
            state: Mutex::new(WindowState::default()),
            length,
        }
    }

    /// Open a fresh window at `now`
    pub fn start(&self, now: Instant) {
        let mut state = lock(&self.state);
        state.opened_at = Some(now);
        state.consumed = false;
    }

    /// Claim the window's single drain; false when closed or already used
    pub fn try_consume(&self, now: Instant) -> bool {
        let mut state = lock(&self.state);
        let open = state
            .opened_at
            .is_some_and(|opened| now.saturating_duration_since(opened) <= self.length);
        if !open || state.consumed {
            return false;
        }
        state.consumed = true;
        true
    }

    pub fn reset(&self) {
        *lock(&self.state) = WindowState::default();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

type Waiter = oneshot::Sender<Option<Arc<ReportTag>>>;

struct PendingLookup {
    key: String,
    identity: String,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
struct PendingBatch {
    /// A drain is scheduled and has not fired yet
    open: bool,
    lookups: Vec<PendingLookup>,
}

/// Coalesces report lookups into batched calls
pub struct ReportDispatcher {
    source: Arc<dyn ReportSource>,
    credential: SharedCredential,
    cache: DashMap<String, Arc<ReportTag>>,
    pending: Mutex<PendingBatch>,
    window: BatchWindowTracker,
    events: EventBus,
    runtime: Handle,
}

impl ReportDispatcher {
    /// Must be called inside a tokio runtime; batch drains are spawned on it
    pub fn new(source: Arc<dyn ReportSource>, credential: SharedCredential, events: EventBus) -> Self {
        Self {
            source,
            credential,
            cache: DashMap::new(),
            pending: Mutex::new(PendingBatch::default()),
            window: BatchWindowTracker::new(BATCH_WINDOW),
            events,
            runtime: Handle::current(),
        }
    }

    /// Open the batching window (session start / world join)
    pub fn start_window(&self) {
        self.window.start(Instant::now());
    }

    /// Cached tag, without triggering a lookup
    pub fn cached(&self, identity: &str) -> Option<Arc<ReportTag>> {
        self.cache
            .get(&normalize_identity(identity))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Drop all cached tags and close the window
    pub fn clear(&self) {
        self.cache.clear();
        self.window.reset();
    }

    /// Resolve the report tag for an identity.
    ///
    /// Returns `None` while the tag is pending: the lookup failed and
    /// nothing was cached.
    pub async fn lookup(self: &Arc<Self>, identity: &str) -> Option<Arc<ReportTag>> {
        let key = normalize_identity(identity);
        if key.is_empty() {
            return None;
        }
        if let Some(tag) = self.cache.get(&key) {
            return Some(Arc::clone(tag.value()));
        }

        if !self.credential.is_configured() {
            return Some(self.cache_tag(&key, None));
        }

        match self.enqueue(&key, identity.trim()) {
            Some(rx) => rx.await.ok().flatten(),
            None => self.lookup_individual(&key, identity.trim()).await,
        }
    }

    /// Emit a `ReportTagged` event the first time a tagged record is seen
    pub fn announce_if_needed(&self, tag: &ReportTag) -> bool {
        let Some(report) = tag.report() else {
            return false;
        };
        if !tag.mark_announced() {
            return false;
        }
        self.events.emit_lossy(EnrichmentEvent::ReportTagged {
            identity: tag.identity().to_string(),
            label: report.kind.chat_label().to_string(),
            reason: report.reason.clone(),
            added_on: report.added_on.clone(),
            timestamp: chrono::Utc::now(),
        });
        true
    }

    /// Join the pending batch if one is open or can be opened
    fn enqueue(self: &Arc<Self>, key: &str, identity: &str) -> Option<oneshot::Receiver<Option<Arc<ReportTag>>>> {
        let (tx, rx) = oneshot::channel();
        let mut batch = lock(&self.pending);

        if !batch.open {
            if !self.window.try_consume(Instant::now()) {
                return None;
            }
            batch.open = true;
            let this = Arc::clone(self);
            self.runtime.spawn(async move {
                tokio::time::sleep(DEBOUNCE).await;
                this.drain().await;
            });
        }

        match batch.lookups.iter_mut().find(|p| p.key == key) {
            Some(pending) => pending.waiters.push(tx),
            None => batch.lookups.push(PendingLookup {
                key: key.to_string(),
                identity: identity.to_string(),
                waiters: vec![tx],
            }),
        }
        Some(rx)
    }

    async fn drain(&self) {
        let lookups = {
            let mut batch = lock(&self.pending);
            batch.open = false;
            std::mem::take(&mut batch.lookups)
        };
        if lookups.is_empty() {
            return;
        }

        let identities: Vec<String> = lookups.iter().map(|p| p.identity.clone()).collect();
        debug!(count = identities.len(), "Draining batched report lookups");
        let result = self.fetch(&identities).await;

        for lookup in lookups {
            let tag = match &result {
                Ok(reports) => Some(self.resolve(&lookup.key, reports)),
                Err(_) => None,
            };
            for waiter in lookup.waiters {
                // Receiver may have been dropped by a cancelled caller
                let _ = waiter.send(tag.clone());
            }
        }
    }

    async fn lookup_individual(&self, key: &str, identity: &str) -> Option<Arc<ReportTag>> {
        let reports = self.fetch(&[identity.to_string()]).await.ok()?;
        Some(self.resolve(key, &reports))
    }

    async fn fetch(&self, identities: &[String]) -> FetchResult<HashMap<String, Vec<Report>>> {
        let key = self.credential.get();
        let result = self.source.fetch_reports(&key, identities).await;
        if let Err(e) = &result {
            warn!(count = identities.len(), error = %e, "Report lookup failed");
        }
        result
    }

    fn resolve(&self, key: &str, reports: &HashMap<String, Vec<Report>>) -> Arc<ReportTag> {
        let report = reports.get(key).and_then(|r| surfaced_report(r));
        self.cache_tag(key, report)
    }

    /// Store a tag, keeping the existing one when the payload is unchanged
    fn cache_tag(&self, key: &str, report: Option<Report>) -> Arc<ReportTag> {
        match self.cache.entry(key.to_string()) {
            Entry::Occupied(entry) if entry.get().same_payload(&report) => Arc::clone(entry.get()),
            Entry::Occupied(mut entry) => {
                let tag = Arc::new(ReportTag::new(key.to_string(), report));
                entry.insert(Arc::clone(&tag));
                tag
            }
            Entry::Vacant(entry) => {
                let tag = Arc::new(ReportTag::new(key.to_string(), report));
                entry.insert(Arc::clone(&tag));
                tag
            }
        }
    }
}
