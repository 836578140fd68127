//! Realtime session client for Rendezvous.
//!
//! This crate provides:
//! - WebSocket transport to the session endpoint
//! - Session state machine fed by server frames
//! - Heartbeat for connection keepalive
//! - Fixed-delay reconnection, suppressed once the session is terminal
//! - A single `SessionClient` handle whose snapshot is the observable state

mod client;
mod credentials;
mod error;
mod heartbeat;
mod messages;
mod reconnect;
mod state;
mod transport;

pub use client::{SessionClient, SessionClientConfig, SessionSnapshot, SESSION_ID_PLACEHOLDER};
pub use credentials::{CredentialSource, EnvCredentials, StaticCredentials};
pub use error::{RelayError, RelayResult};
pub use heartbeat::HeartbeatMonitor;
pub use messages::{FrameError, InboundFrame, OutboundFrame};
pub use reconnect::{ReconnectDecision, ReconnectSupervisor};
pub use state::{RoundMessage, Scores, SessionState, SessionStatus, Transition, DEFAULT_TOTAL_ROUNDS};
pub use transport::{
    ChannelConnector, Connection, Connector, FrameSender, RemoteEnd, TransportEvent, WsConnector,
};
