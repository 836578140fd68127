//! Change-feed alert de-duplication.
//!
//! The hosted change feed may deliver the same row change through more than
//! one subscription. This crate classifies notifications into feed events,
//! shows an alert at most once per event within a short window, and always
//! runs the cache invalidation so data stays fresh.

mod cache;
mod clock;
mod dedup;
mod error;
mod events;
mod router;

pub use cache::{DedupCache, DEFAULT_CAPACITY};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dedup::{DedupConfig, DedupOutcome, EventDeduplicator};
pub use error::{FeedError, FeedResult};
pub use events::{
    CacheScope, ChangeKind, ChangeNotification, FeedEvent, MATCH_REQUESTS_TABLE, MESSAGES_TABLE,
};
pub use router::{AlertSink, CacheInvalidator, FeedRouter, RecordingSink, RouteOutcome};
