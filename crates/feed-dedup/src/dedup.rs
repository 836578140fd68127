//! Alert suppression per logical event key.

use crate::cache::{DedupCache, DEFAULT_CAPACITY};
use crate::clock::{Clock, SystemClock};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;

/// Deduplicator configuration.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Suppression window for match-request events.
    pub request_window: Duration,
    /// Suppression window for chat messages.
    pub message_window: Duration,
    /// Maximum number of live keys.
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            request_window: Duration::from_secs(3),
            message_window: Duration::from_secs(2),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// What happened to one observed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First sighting in the window: alert and invalidation both ran.
    Alerted,
    /// Repeat within the window: only invalidation ran.
    Suppressed,
}

/// Runs the alert at most once per key and window, the invalidation always.
///
/// Safe to share between subscriptions; the cache lock is never held while
/// callbacks run.
pub struct EventDeduplicator<C: Clock = SystemClock> {
    cache: Mutex<DedupCache>,
    clock: C,
}

impl EventDeduplicator<SystemClock> {
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, SystemClock)
    }
}

impl Default for EventDeduplicator<SystemClock> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<C: Clock> EventDeduplicator<C> {
    pub fn with_clock(capacity: usize, clock: C) -> Self {
        Self {
            cache: Mutex::new(DedupCache::new(capacity)),
            clock,
        }
    }

    /// Observe one delivery of the event identified by `key`.
    pub fn observe<A, I>(&self, key: &str, window: Duration, alert: A, invalidate: I) -> DedupOutcome
    where
        A: FnOnce(),
        I: FnOnce(),
    {
        let now = self.clock.now();
        let fresh = self.cache.lock().try_claim(key, now, window);

        invalidate();

        if fresh {
            alert();
            DedupOutcome::Alerted
        } else {
            debug!(key = %key, "Suppressed repeat alert");
            DedupOutcome::Suppressed
        }
    }

    /// Whether an alert for `key` would currently be suppressed.
    pub fn is_suppressed(&self, key: &str) -> bool {
        self.cache.lock().is_live(key, self.clock.now())
    }

    /// Drop expired entries now instead of waiting for the next lookup.
    pub fn purge_expired(&self) -> usize {
        self.cache.lock().purge_expired(self.clock.now())
    }

    /// Number of entries held, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}
