//! Session wire frames.

use crate::state::{RoundMessage, Scores, SessionStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inbound frame types this client understands.
const KNOWN_INBOUND_TYPES: &[&str] = &["state", "round_message", "completed", "error", "pong"];

/// A frame received from the session endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Full session snapshot, sent by the server after every (re)connect.
    State {
        status: SessionStatus,
        #[serde(default)]
        current_round: u32,
        #[serde(default)]
        total_rounds: Option<u32>,
        #[serde(default)]
        messages: Vec<RoundMessage>,
    },
    /// One new message of the running conversation.
    RoundMessage {
        round_number: u32,
        speaker: String,
        content: String,
    },
    /// The session finished; carries the final results.
    Completed {
        #[serde(default)]
        scores: Option<Scores>,
        #[serde(default)]
        analysis: Option<serde_json::Value>,
    },
    /// The server gave up on the session.
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    /// Heartbeat reply.
    Pong {},
}

/// Why an inbound text frame was dropped.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    NotJson(#[source] serde_json::Error),

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("unknown frame type `{0}`")]
    UnknownType(String),

    #[error("`state` frame carries client-side status `{0}`")]
    LocalStatus(SessionStatus),

    #[error("malformed `{frame_type}` frame: {source}")]
    Malformed {
        frame_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl InboundFrame {
    /// Parse a text frame, telling unknown types apart from broken payloads.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(FrameError::NotJson)?;

        let frame_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(FrameError::MissingType)?
            .to_string();

        if !KNOWN_INBOUND_TYPES.contains(&frame_type.as_str()) {
            return Err(FrameError::UnknownType(frame_type));
        }

        let frame: Self = serde_json::from_value(value)
            .map_err(|source| FrameError::Malformed { frame_type, source })?;

        // `connecting` and `disconnected` describe this client's transport.
        if let Self::State { status, .. } = &frame {
            if matches!(status, SessionStatus::Connecting | SessionStatus::Disconnected) {
                return Err(FrameError::LocalStatus(*status));
            }
        }
        Ok(frame)
    }

    /// Short name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::State { .. } => "state",
            Self::RoundMessage { .. } => "round_message",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
            Self::Pong {} => "pong",
        }
    }
}

/// A frame sent to the session endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Sent once right after the connection opens.
    Auth {
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    /// Keep-alive.
    Ping {},
}

impl OutboundFrame {
    /// Create an auth frame. A missing token is still sent; the server decides.
    pub fn auth(token: Option<String>) -> Self {
        Self::Auth { token }
    }

    /// Create a keep-alive frame.
    pub fn ping() -> Self {
        Self::Ping {}
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
