//! Change-feed notifications and the domain events derived from them.

use crate::dedup::DedupConfig;
use crate::{FeedError, FeedResult};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Table holding match requests between two users.
pub const MATCH_REQUESTS_TABLE: &str = "match_requests";
/// Table holding chat messages.
pub const MESSAGES_TABLE: &str = "messages";

/// Row operation reported by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level notification as delivered by the hosted change feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChangeNotification {
    pub table: String,
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    #[serde(default, rename = "new")]
    pub record: Value,
    #[serde(default, rename = "old")]
    pub old_record: Value,
}

impl ChangeNotification {
    pub fn from_json(json: &str) -> FeedResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Client cache regions a notification makes stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheScope {
    MatchRequests,
    Matches,
    ChatRooms,
    ChatMessages { room_id: String },
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MatchRequests => f.write_str("match_requests"),
            Self::Matches => f.write_str("matches"),
            Self::ChatRooms => f.write_str("chat_rooms"),
            Self::ChatMessages { room_id } => write!(f, "chat_messages:{}", room_id),
        }
    }
}

/// Events of interest derived from feed notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Someone sent the user a match request.
    MatchRequestReceived { request_id: String },
    /// A match request moved to `accepted`.
    MatchRequestAccepted { request_id: String },
    /// Any other request change; refreshes data without alerting.
    MatchRequestUpdated { request_id: String },
    /// A new chat message.
    ChatMessage { room_id: String, message_id: String },
}

impl FeedEvent {
    /// Classify a notification. `Ok(None)` means nothing of interest.
    pub fn from_notification(notification: &ChangeNotification) -> FeedResult<Option<Self>> {
        let table = notification.table.as_str();
        let record = &notification.record;

        let event = match (table, notification.kind) {
            (MATCH_REQUESTS_TABLE, ChangeKind::Insert) => Self::MatchRequestReceived {
                request_id: id_field(table, record, "id")?,
            },
            (MATCH_REQUESTS_TABLE, ChangeKind::Update) => {
                let request_id = id_field(table, record, "id")?;
                let status = record.get("status").and_then(Value::as_str);
                let old_status = notification.old_record.get("status").and_then(Value::as_str);
                if status == Some("accepted") && old_status != Some("accepted") {
                    Self::MatchRequestAccepted { request_id }
                } else {
                    Self::MatchRequestUpdated { request_id }
                }
            }
            (MESSAGES_TABLE, ChangeKind::Insert) => Self::ChatMessage {
                room_id: id_field(table, record, "room_id")?,
                message_id: id_field(table, record, "id")?,
            },
            _ => return Ok(None),
        };

        Ok(Some(event))
    }

    /// Key identifying this logical event across redundant deliveries.
    pub fn dedup_key(&self) -> String {
        match self {
            Self::MatchRequestReceived { request_id } => {
                format!("match_request:received:{}", request_id)
            }
            Self::MatchRequestAccepted { request_id } => {
                format!("match_request:accepted:{}", request_id)
            }
            Self::MatchRequestUpdated { request_id } => {
                format!("match_request:updated:{}", request_id)
            }
            Self::ChatMessage {
                room_id,
                message_id,
            } => format!("chat_message:{}:{}", room_id, message_id),
        }
    }

    /// Whether this event warrants a user-visible alert.
    pub fn alerts(&self) -> bool {
        !matches!(self, Self::MatchRequestUpdated { .. })
    }

    pub fn suppression_window(&self, config: &DedupConfig) -> Duration {
        match self {
            Self::ChatMessage { .. } => config.message_window,
            _ => config.request_window,
        }
    }

    /// Cache regions to refetch for this event.
    pub fn invalidates(&self) -> Vec<CacheScope> {
        match self {
            Self::MatchRequestReceived { .. } | Self::MatchRequestUpdated { .. } => {
                vec![CacheScope::MatchRequests]
            }
            Self::MatchRequestAccepted { .. } => vec![
                CacheScope::MatchRequests,
                CacheScope::Matches,
                CacheScope::ChatRooms,
            ],
            Self::ChatMessage { room_id, .. } => vec![
                CacheScope::ChatMessages {
                    room_id: room_id.clone(),
                },
                CacheScope::ChatRooms,
            ],
        }
    }
}

/// Row ids may be UUID strings or integers.
fn id_field(table: &str, record: &Value, field: &str) -> FeedResult<String> {
    match record.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(FeedError::MissingField {
            table: table.to_string(),
            field: field.to_string(),
        }),
    }
}
