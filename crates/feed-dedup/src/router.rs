//! Routes feed notifications to alert and cache-invalidation sinks.

use crate::clock::{Clock, SystemClock};
use crate::dedup::{DedupConfig, DedupOutcome, EventDeduplicator};
use crate::events::{CacheScope, ChangeNotification, FeedEvent};
use crate::FeedResult;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Receives user-visible alerts.
pub trait AlertSink: Send + Sync {
    fn alert(&self, event: &FeedEvent);
}

/// Marks cached data stale so it is refetched.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, scope: &CacheScope);
}

/// What the router did with one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Not an event of interest.
    Ignored,
    /// Alert shown and caches invalidated.
    Alerted(FeedEvent),
    /// Repeat within the window: caches invalidated, alert suppressed.
    Suppressed(FeedEvent),
    /// Event never alerts: caches invalidated only.
    Invalidated(FeedEvent),
}

/// Feed consumer: classify, dedup, fan out.
pub struct FeedRouter<C: Clock = SystemClock> {
    config: DedupConfig,
    dedup: EventDeduplicator<C>,
    alerts: Arc<dyn AlertSink>,
    invalidator: Arc<dyn CacheInvalidator>,
}

impl FeedRouter<SystemClock> {
    pub fn new(
        config: DedupConfig,
        alerts: Arc<dyn AlertSink>,
        invalidator: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self::with_clock(config, SystemClock, alerts, invalidator)
    }
}

impl<C: Clock> FeedRouter<C> {
    pub fn with_clock(
        config: DedupConfig,
        clock: C,
        alerts: Arc<dyn AlertSink>,
        invalidator: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            dedup: EventDeduplicator::with_clock(config.capacity, clock),
            config,
            alerts,
            invalidator,
        }
    }

    /// Handle one notification.
    pub fn handle(&self, notification: &ChangeNotification) -> FeedResult<RouteOutcome> {
        let Some(event) = FeedEvent::from_notification(notification)? else {
            debug!(table = %notification.table, kind = ?notification.kind, "Ignoring notification");
            return Ok(RouteOutcome::Ignored);
        };

        let invalidate = || {
            for scope in event.invalidates() {
                self.invalidator.invalidate(&scope);
            }
        };

        if !event.alerts() {
            invalidate();
            return Ok(RouteOutcome::Invalidated(event));
        }

        let key = event.dedup_key();
        let outcome = self.dedup.observe(
            &key,
            event.suppression_window(&self.config),
            || self.alerts.alert(&event),
            invalidate,
        );

        Ok(match outcome {
            DedupOutcome::Alerted => {
                info!(key = %key, "Alerted for feed event");
                RouteOutcome::Alerted(event)
            }
            DedupOutcome::Suppressed => RouteOutcome::Suppressed(event),
        })
    }

    pub fn deduplicator(&self) -> &EventDeduplicator<C> {
        &self.dedup
    }
}

/// Records alerts and invalidations in arrival order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<FeedEvent>>,
    invalidations: Mutex<Vec<CacheScope>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<FeedEvent> {
        self.alerts.lock().clone()
    }

    pub fn invalidations(&self) -> Vec<CacheScope> {
        self.invalidations.lock().clone()
    }

    pub fn clear(&self) {
        self.alerts.lock().clear();
        self.invalidations.lock().clear();
    }
}

impl AlertSink for RecordingSink {
    fn alert(&self, event: &FeedEvent) {
        self.alerts.lock().push(event.clone());
    }
}

impl CacheInvalidator for RecordingSink {
    fn invalidate(&self, scope: &CacheScope) {
        self.invalidations.lock().push(scope.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::ChangeKind;
    use serde_json::json;

    fn router(clock: &ManualClock, sink: &Arc<RecordingSink>) -> FeedRouter<ManualClock> {
        FeedRouter::with_clock(DedupConfig::default(), clock.clone(), sink.clone(), sink.clone())
    }

    fn request_accepted(id: &str) -> ChangeNotification {
        ChangeNotification {
            table: "match_requests".to_string(),
            kind: ChangeKind::Update,
            record: json!({"id": id, "status": "accepted"}),
            old_record: json!({"id": id, "status": "pending"}),
        }
    }

    #[test]
    fn test_accepted_request_fans_out() {
        let clock = ManualClock::new();
        let sink = Arc::new(RecordingSink::new());
        let router = router(&clock, &sink);

        let outcome = router.handle(&request_accepted("r1")).unwrap();
        assert!(matches!(outcome, RouteOutcome::Alerted(_)));
        assert_eq!(sink.alerts().len(), 1);
        assert_eq!(
            sink.invalidations(),
            vec![CacheScope::MatchRequests, CacheScope::Matches, CacheScope::ChatRooms]
        );
    }

    #[test]
    fn test_overlapping_deliveries_alert_once() {
        let clock = ManualClock::new();
        let sink = Arc::new(RecordingSink::new());
        let router = router(&clock, &sink);

        router.handle(&request_accepted("r1")).unwrap();
        let outcome = router.handle(&request_accepted("r1")).unwrap();

        assert!(matches!(outcome, RouteOutcome::Suppressed(_)));
        assert_eq!(sink.alerts().len(), 1);
        assert_eq!(sink.invalidations().len(), 6);
    }

    #[test]
    fn test_ignored_notification_touches_nothing() {
        let clock = ManualClock::new();
        let sink = Arc::new(RecordingSink::new());
        let router = router(&clock, &sink);

        let n = ChangeNotification {
            table: "profiles".to_string(),
            kind: ChangeKind::Update,
            record: json!({"id": 1}),
            old_record: json!(null),
        };
        assert_eq!(router.handle(&n).unwrap(), RouteOutcome::Ignored);
        assert!(sink.alerts().is_empty());
        assert!(sink.invalidations().is_empty());
        assert!(router.deduplicator().is_empty());
    }

    #[test]
    fn test_recording_sink_clear() {
        let sink = RecordingSink::new();
        sink.invalidate(&CacheScope::Matches);
        sink.clear();
        assert!(sink.invalidations().is_empty());
    }
}
