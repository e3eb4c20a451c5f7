//! The bounded permission cache carried inside bearer tokens.
//!
//! The cache is advisory: it accelerates the permission decision on the fast
//! path but the casefile ACL remains the source of record. Because the cache
//! travels inside a signed claim, all bookkeeping (including LRU timestamps)
//! lives in the cache value itself and the token service stays stateless.

use super::level::PermissionLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One cached casefile-to-level grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionCacheEntry {
    /// The casefile the cached level applies to
    pub casefile_id: String,
    /// Cached effective permission level
    pub level: PermissionLevel,
    /// Last time this entry was read or written; drives LRU eviction
    pub touched_at: DateTime<Utc>,
}

/// A bounded, LRU-evicted permission cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionCache {
    #[serde(default)]
    entries: Vec<PermissionCacheEntry>,
}

impl PermissionCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached level for a casefile, if present.
    ///
    /// Does not bump the LRU timestamp; use [`PermissionCache::touch`] when
    /// the hit actually drives an authorization decision.
    pub fn get(&self, casefile_id: &str) -> Option<PermissionLevel> {
        self.entries
            .iter()
            .find(|e| e.casefile_id == casefile_id)
            .map(|e| e.level)
    }

    /// Marks an entry as recently used.
    pub fn touch(&mut self, casefile_id: &str, now: DateTime<Utc>) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.casefile_id == casefile_id)
        {
            entry.touched_at = now;
        }
    }

    /// Inserts or updates an entry, evicting least-recently-touched entries
    /// while the cache exceeds `max_entries`.
    pub fn insert(
        &mut self,
        casefile_id: impl Into<String>,
        level: PermissionLevel,
        now: DateTime<Utc>,
        max_entries: usize,
    ) {
        let casefile_id = casefile_id.into();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.casefile_id == casefile_id)
        {
            entry.level = level;
            entry.touched_at = now;
        } else {
            self.entries.push(PermissionCacheEntry {
                casefile_id,
                level,
                touched_at: now,
            });
        }
        self.evict_to(max_entries);
    }

    /// Merges another set of entries into this cache, then enforces the bound.
    ///
    /// Incoming entries win on conflict (they reflect a fresher authoritative
    /// lookup) and count as touched now.
    pub fn merge(
        &mut self,
        new_entries: impl IntoIterator<Item = (String, PermissionLevel)>,
        now: DateTime<Utc>,
        max_entries: usize,
    ) {
        for (casefile_id, level) in new_entries {
            self.insert(casefile_id, level, now, max_entries);
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no entries are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Immutable view of the entries, for serialization into result envelopes.
    pub fn entries(&self) -> &[PermissionCacheEntry] {
        &self.entries
    }

    fn evict_to(&mut self, max_entries: usize) {
        while self.entries.len() > max_entries.max(1) {
            let oldest = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.touched_at)
                .map(|(i, _)| i);
            match oldest {
                Some(i) => {
                    let evicted = self.entries.remove(i);
                    tracing::debug!(
                        target: "permission",
                        casefile_id = %evicted.casefile_id,
                        "evicted least-recently-used permission cache entry"
                    );
                }
                None => break,
            }
        }
    }
}
