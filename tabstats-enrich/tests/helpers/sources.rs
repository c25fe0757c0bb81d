//! Scripted remote sources
//!
//! Stand-ins for the profile and report services that count calls and
//! replay scripted outcomes.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tabstats_common::Identifier;
use tabstats_enrich::services::{normalize_identity, ProfileSource, Report, ReportSource};
use tabstats_enrich::{FetchError, FetchResult};
use tokio::time::Instant;

/// Minimal profile payload with Bedwars wins
pub fn player_json(name: &str, bedwars_wins: i64) -> Value {
    json!({
        "displayname": name,
        "stats": {"Bedwars": {"wins_bedwars": bedwars_wins}}
    })
}

/// Profile source replaying per-identity scripts, then a fallback outcome
pub struct ScriptedProfileSource {
    scripts: Mutex<HashMap<Identifier, VecDeque<FetchResult<Value>>>>,
    fallback: FetchResult<Value>,
    delay: Duration,
    calls: Mutex<Vec<(Identifier, Instant)>>,
}

impl ScriptedProfileSource {
    /// Every call without a script entry returns `fallback`
    pub fn always(fallback: FetchResult<Value>) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with `error`
    pub fn failing(error: FetchError) -> Self {
        Self::always(Err(error))
    }

    /// Simulated response latency
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue outcomes for `id`, consumed one per call before the fallback
    pub fn script(self, id: Identifier, outcomes: Vec<FetchResult<Value>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .extend(outcomes);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, id: Identifier) -> usize {
        self.call_times(id).len()
    }

    /// Instants at which `id` was fetched, in call order
    pub fn call_times(&self, id: Identifier) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| *called == id)
            .map(|(_, at)| *at)
            .collect()
    }

    /// Gaps between consecutive fetches of `id`, in milliseconds
    pub fn gaps_ms(&self, id: Identifier) -> Vec<u64> {
        self.call_times(id)
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
            .collect()
    }
}

#[async_trait]
impl ProfileSource for ScriptedProfileSource {
    async fn fetch_profile(&self, id: Identifier) -> FetchResult<Value> {
        self.calls.lock().unwrap().push((id, Instant::now()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Report source answering from a fixed table and recording each batch
pub struct StubReportSource {
    reports: HashMap<String, Vec<Report>>,
    fail: bool,
    batches: Mutex<Vec<Vec<String>>>,
}

impl StubReportSource {
    pub fn new() -> Self {
        Self {
            reports: HashMap::new(),
            fail: false,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with_report(mut self, identity: &str, report: Report) -> Self {
        self.reports
            .entry(normalize_identity(identity))
            .or_default()
            .push(report);
        self
    }

    /// Identities requested by each call, in call order
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl ReportSource for StubReportSource {
    async fn fetch_reports(
        &self,
        _key: &str,
        identities: &[String],
    ) -> FetchResult<HashMap<String, Vec<Report>>> {
        self.batches.lock().unwrap().push(identities.to_vec());
        if self.fail {
            return Err(FetchError::RequestFailed("report service down".to_string()));
        }
        Ok(identities
            .iter()
            .map(|identity| {
                let key = normalize_identity(identity);
                let reports = self.reports.get(&key).cloned().unwrap_or_default();
                (key, reports)
            })
            .collect())
    }
}
