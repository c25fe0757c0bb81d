//! # TabStats Enrichment
//!
//! Enriches players seen in a multiplayer session with profile data from a
//! rate-limited remote service:
//! - Per-tick discovery with provenance classification
//! - Concurrent cache with alias index and in-flight deduplication
//! - Fetch chains with throttle-aware retry and bounded eviction
//! - Batched report-tag lookups

pub mod discovery;
pub mod error;
pub mod games;
pub mod models;
pub mod orchestrator;
pub mod pool;
pub mod reports;
pub mod services;
pub mod session;
pub mod world;

pub use discovery::{DiscoveryConsumer, TickSummary};
pub use error::{FetchError, FetchResult};
pub use models::{Candidate, EnrichedRecord, NamedStat, RecordState, StatValue};
pub use orchestrator::{FetchOrchestrator, RetryPolicy};
pub use reports::{ReportDispatcher, ReportTag};
pub use session::Session;
pub use world::World;
