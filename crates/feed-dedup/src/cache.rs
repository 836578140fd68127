//! Bounded map of dedup keys to expiry instants.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default number of live keys kept.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Dedup entries keyed by logical event key.
///
/// An entry is live until its expiry instant. Expired entries are ignored on
/// lookup and purged lazily. When the cache is full of live entries, the one
/// closest to expiry is evicted.
#[derive(Debug)]
pub struct DedupCache {
    entries: HashMap<String, Instant>,
    capacity: usize,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `key` has an unexpired entry at `now`.
    pub fn is_live(&self, key: &str, now: Instant) -> bool {
        self.entries.get(key).is_some_and(|expires_at| *expires_at > now)
    }

    /// Claim `key` for `window`. Returns false if a live entry already holds it.
    pub fn try_claim(&mut self, key: &str, now: Instant, window: Duration) -> bool {
        if self.is_live(key, now) {
            return false;
        }

        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.purge_expired(now);
            if self.entries.len() >= self.capacity {
                self.evict_soonest();
            }
        }

        self.entries.insert(key.to_string(), now + window);
        true
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before - self.entries.len()
    }

    fn evict_soonest(&mut self) {
        let soonest = self
            .entries
            .iter()
            .min_by_key(|(_, expires_at)| **expires_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = soonest {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
