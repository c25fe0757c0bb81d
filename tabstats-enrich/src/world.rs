//! Enrichment cache
//!
//! The [`World`] holds every piece of per-session enrichment state:
//!
//! - `records`: identifier to immutable record snapshot
//! - `aliases`: lowercased name to record, for lookups by display name
//! - `assembling`: identifiers with a fetch chain in flight
//! - `ages` / `durable`: sighting counters and the identities that have
//!   been visible long enough to survive eviction
//! - `rejected`: identities that must not be dispatched again this session
//!
//! All state lives in `dashmap` collections, so readers and the fetch
//! workers never need an outer lock. No method holds a guard on one map
//! while calling into the same map.

use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use std::sync::Arc;
use tabstats_common::identity::strip_color;
use tabstats_common::Identifier;
use tracing::debug;

use crate::models::EnrichedRecord;

/// Cache size above which the eviction sweep runs
pub const DEFAULT_CEILING: usize = 500;

/// Sightings after which an identity counts as durable
pub const DEFAULT_DURABLE_AFTER: u32 = 100;

fn alias_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Per-session enrichment cache
pub struct World {
    records: DashMap<Identifier, Arc<EnrichedRecord>>,
    aliases: DashMap<String, Arc<EnrichedRecord>>,
    assembling: DashSet<Identifier>,
    rejected: DashSet<Identifier>,
    ages: DashMap<Identifier, u32>,
    durable: DashSet<Identifier>,
    ceiling: usize,
    durable_after: u32,
}

impl Default for World {
    fn default() -> Self {
        Self::new(DEFAULT_CEILING, DEFAULT_DURABLE_AFTER)
    }
}

impl World {
    pub fn new(ceiling: usize, durable_after: u32) -> Self {
        Self {
            records: DashMap::new(),
            aliases: DashMap::new(),
            assembling: DashSet::new(),
            rejected: DashSet::new(),
            ages: DashMap::new(),
            durable: DashSet::new(),
            ceiling,
            durable_after: durable_after.max(1),
        }
    }

    /// Atomically claim `id` for assembly.
    ///
    /// Returns true for exactly one caller until the claim is released by
    /// [`commit`](Self::commit) or [`abandon`](Self::abandon).
    pub fn try_begin_assembly(&self, id: Identifier) -> bool {
        self.assembling.insert(id)
    }

    pub fn is_assembling(&self, id: Identifier) -> bool {
        self.assembling.contains(&id)
    }

    pub fn get(&self, id: Identifier) -> Option<Arc<EnrichedRecord>> {
        self.records.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: Identifier) -> bool {
        self.records.contains_key(&id)
    }

    /// Lookup by name alias (trimmed, case-insensitive, colour codes ignored)
    pub fn get_by_name(&self, name: &str) -> Option<Arc<EnrichedRecord>> {
        let key = alias_key(name);
        if key.is_empty() {
            return None;
        }
        if let Some(entry) = self.aliases.get(&key) {
            return Some(Arc::clone(entry.value()));
        }
        let stripped = alias_key(&strip_color(name));
        if stripped == key {
            return None;
        }
        self.aliases.get(&stripped).map(|entry| Arc::clone(entry.value()))
    }

    /// Lookup by identifier, falling back to each name in order
    pub fn get_by_identity(
        &self,
        id: Identifier,
        fallback_names: &[&str],
    ) -> Option<Arc<EnrichedRecord>> {
        self.get(id)
            .or_else(|| fallback_names.iter().find_map(|name| self.get_by_name(name)))
    }

    /// Insert or overwrite the record for `id` and release its assembly claim
    pub fn commit(&self, id: Identifier, record: EnrichedRecord) -> Arc<EnrichedRecord> {
        self.commit_with_aliases(id, record, &[])
    }

    /// Like [`commit`](Self::commit), additionally aliasing `extra_names`
    pub fn commit_with_aliases(
        &self,
        id: Identifier,
        record: EnrichedRecord,
        extra_names: &[&str],
    ) -> Arc<EnrichedRecord> {
        let record = Arc::new(record);
        if let Some(previous) = self.records.insert(id, Arc::clone(&record)) {
            self.prune_aliases(&previous);
        }

        let display_name = record.display_name().to_string();
        self.register_alias(&display_name, &record);
        self.register_alias(&strip_color(&display_name), &record);
        for name in extra_names {
            self.register_alias(name, &record);
        }

        self.assembling.remove(&id);
        record
    }

    /// Point an additional name at the record cached under `id`
    pub fn alias(&self, id: Identifier, name: &str) {
        if let Some(record) = self.get(id) {
            self.register_alias(name, &record);
        }
    }

    /// Release the assembly claim without caching anything
    pub fn abandon(&self, id: Identifier) {
        self.assembling.remove(&id);
    }

    /// Never dispatch `id` again this session
    pub fn reject(&self, id: Identifier) {
        self.rejected.insert(id);
    }

    pub fn is_rejected(&self, id: Identifier) -> bool {
        self.rejected.contains(&id)
    }

    /// Count one sighting of `id`; returns the new age
    pub fn record_sighting(&self, id: Identifier) -> u32 {
        let age = {
            let mut age = self.ages.entry(id).or_insert(0);
            let next = age.saturating_add(1);
            *age = next;
            next
        };
        if age >= self.durable_after {
            self.durable.insert(id);
        }
        age
    }

    pub fn is_durable(&self, id: Identifier) -> bool {
        self.durable.contains(&id)
    }

    /// Bounded eviction sweep.
    ///
    /// Sighting counters and rejections for identities that are neither
    /// visible nor cached are dropped on every call. Records are only swept
    /// once the cache holds more than `ceiling` entries: the identities both
    /// in `observed` and durable survive, the durable set is narrowed to
    /// them and every other entry is removed. Returns the number of evicted
    /// records.
    pub fn evict_if_oversize(&self, observed: &HashSet<Identifier>) -> usize {
        self.prune_untracked(observed);
        if self.records.len() <= self.ceiling {
            return 0;
        }

        let safe: HashSet<Identifier> = observed
            .iter()
            .copied()
            .filter(|id| self.durable.contains(id))
            .collect();
        self.durable.retain(|id| safe.contains(id));

        let doomed: Vec<Identifier> = self
            .records
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| !safe.contains(id))
            .collect();
        for id in &doomed {
            self.remove(*id);
        }

        debug!(
            evicted = doomed.len(),
            retained = self.records.len(),
            "Eviction sweep"
        );
        doomed.len()
    }

    /// Drop one identity with its aliases, age and assembly state
    pub fn remove(&self, id: Identifier) -> Option<Arc<EnrichedRecord>> {
        let removed = self.records.remove(&id).map(|(_, record)| record);
        if let Some(record) = &removed {
            self.prune_aliases(record);
        }
        self.ages.remove(&id);
        self.durable.remove(&id);
        self.assembling.remove(&id);
        removed
    }

    /// Forget `id` entirely so the next sighting re-fetches it
    pub fn recheck(&self, id: Identifier) -> bool {
        let removed = self.remove(id).is_some();
        self.rejected.remove(&id);
        removed
    }

    /// Reset assembly, rejection and age tracking; every cached identity
    /// becomes durable
    pub fn rerender(&self) {
        self.assembling.clear();
        self.rejected.clear();
        self.ages.clear();
        for entry in self.records.iter() {
            self.durable.insert(*entry.key());
        }
    }

    /// Drop everything
    pub fn clear(&self) {
        self.records.clear();
        self.aliases.clear();
        self.assembling.clear();
        self.rejected.clear();
        self.ages.clear();
        self.durable.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All cached records, ordered by display name
    pub fn snapshot(&self) -> Vec<Arc<EnrichedRecord>> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        records.sort_by(|a, b| {
            a.display_name()
                .to_lowercase()
                .cmp(&b.display_name().to_lowercase())
        });
        records
    }

    fn prune_untracked(&self, observed: &HashSet<Identifier>) {
        let tracked = |id: &Identifier| observed.contains(id) || self.records.contains_key(id);
        self.ages.retain(|id, _| tracked(id));
        self.durable.retain(|id| tracked(id));
        self.rejected.retain(|id| observed.contains(id));
    }

    fn register_alias(&self, name: &str, record: &Arc<EnrichedRecord>) {
        let key = alias_key(name);
        if !key.is_empty() {
            self.aliases.insert(key, Arc::clone(record));
        }
    }

    fn prune_aliases(&self, record: &Arc<EnrichedRecord>) {
        self.aliases.retain(|_, aliased| !Arc::ptr_eq(aliased, record));
    }
}
