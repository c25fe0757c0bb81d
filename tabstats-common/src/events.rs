//! Event types for the TabStats event system
//!
//! The enrichment pipeline reports its terminal decisions (commit, abandon,
//! credential rejection, eviction) and report-tag announcements through an
//! [`EventBus`]. The presentation layer subscribes to surface them; nothing in
//! the pipeline depends on anyone listening.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::identity::Identifier;

/// What kind of record a commit stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    /// Profile fetched, game stats attached
    Enriched,
    /// Disguised identity, no fetch attempted
    Nicked,
    /// Retries exhausted, name only
    Bare,
    /// Existing record re-used under the canonical identifier
    Resolved,
}

/// Why a fetch chain ended without caching anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// Enrichment was switched off while the fetch was queued
    Disabled,
    /// The profile service rejected the credential
    InvalidCredential,
    /// Ephemeral identity without a profile (lobby bot / spoofed entry)
    EphemeralWithoutProfile,
}

/// TabStats event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EnrichmentEvent {
    /// A record was written into the cache
    RecordCommitted {
        id: Identifier,
        display_name: String,
        kind: CommitKind,
        attempts: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A fetch chain ended without a cache write
    FetchAbandoned {
        id: Identifier,
        reason: AbandonReason,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Profile credential rejected; enrichment halted until it changes
    CredentialRejected {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Bounded-eviction sweep removed entries
    CacheEvicted {
        evicted: usize,
        retained: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Whole cache dropped (credential change, session end, recheck-all)
    CacheCleared {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A report tag resolved for an identity; emitted at most once per tag
    ReportTagged {
        identity: String,
        label: String,
        reason: String,
        added_on: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl EnrichmentEvent {
    /// Event type name, matching the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            EnrichmentEvent::RecordCommitted { .. } => "RecordCommitted",
            EnrichmentEvent::FetchAbandoned { .. } => "FetchAbandoned",
            EnrichmentEvent::CredentialRejected { .. } => "CredentialRejected",
            EnrichmentEvent::CacheEvicted { .. } => "CacheEvicted",
            EnrichmentEvent::CacheCleared { .. } => "CacheCleared",
            EnrichmentEvent::ReportTagged { .. } => "ReportTagged",
        }
    }
}

/// Broadcast bus for [`EnrichmentEvent`]s
///
/// Cloning the bus is cheap; all clones share one channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EnrichmentEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before slow receivers lag
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EnrichmentEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EnrichmentEvent,
    ) -> Result<usize, broadcast::error::SendError<EnrichmentEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EnrichmentEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
