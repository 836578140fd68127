//! Session client.
//!
//! [`SessionClient`] is a thin handle over a driver task. The driver owns the
//! session state, the current attachment (connection, pending connect,
//! frame forwarder), the heartbeat and the reconnect timer. Every async
//! callback reports back to the driver tagged with the generation it was
//! issued under; anything carrying an older generation is dropped.

use crate::credentials::CredentialSource;
use crate::heartbeat::HeartbeatMonitor;
use crate::messages::{InboundFrame, OutboundFrame};
use crate::reconnect::{ReconnectDecision, ReconnectSupervisor};
use crate::state::{SessionState, Transition, DEFAULT_TOTAL_ROUNDS};
use crate::transport::{Connection, Connector, FrameSender, TransportEvent, WsConnector};
use crate::{RelayError, RelayResult};
use futures_util::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Placeholder substituted with the session id in `session_path`.
pub const SESSION_ID_PLACEHOLDER: &str = "{session_id}";

/// Buffer size for driver commands and internal events.
const DRIVER_CHANNEL_CAPACITY: usize = 256;

/// Session client configuration.
#[derive(Debug, Clone)]
pub struct SessionClientConfig {
    /// API base URL (e.g., https://api.rendezvous.app). The WebSocket
    /// scheme follows it: http -> ws, https -> wss.
    pub api_base_url: String,
    /// Endpoint path template; must contain `{session_id}` as a segment.
    pub session_path: String,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Fixed delay before each reconnect attempt, in seconds.
    pub reconnect_delay_secs: u64,
    /// Round count shown before the server reports one.
    pub default_total_rounds: u32,
}

impl Default for SessionClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.rendezvous.app".to_string(),
            session_path: "/ws/sessions/{session_id}".to_string(),
            heartbeat_interval_secs: 30,
            reconnect_delay_secs: 3,
            default_total_rounds: DEFAULT_TOTAL_ROUNDS,
        }
    }
}

impl SessionClientConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Reject settings the client cannot run with: zero intervals, no
    /// rounds, or a base URL and path template that yield no endpoint.
    pub fn validate(&self) -> RelayResult<()> {
        if self.heartbeat_interval_secs == 0 {
            return Err(RelayError::InvalidConfig(
                "heartbeat_interval_secs must be positive".to_string(),
            ));
        }
        if self.reconnect_delay_secs == 0 {
            return Err(RelayError::InvalidConfig(
                "reconnect_delay_secs must be positive".to_string(),
            ));
        }
        if self.default_total_rounds == 0 {
            return Err(RelayError::InvalidConfig(
                "default_total_rounds must be positive".to_string(),
            ));
        }
        self.endpoint_for("validate").map(|_| ())
    }

    /// Path segments of `session_path`; one must be exactly `{session_id}`.
    fn path_template(&self) -> RelayResult<Vec<&str>> {
        let template: Vec<&str> = self
            .session_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        if !template.contains(&SESSION_ID_PLACEHOLDER) {
            return Err(RelayError::InvalidEndpoint(format!(
                "session path `{}` has no {} segment",
                self.session_path, SESSION_ID_PLACEHOLDER
            )));
        }
        Ok(template)
    }

    /// WebSocket endpoint for a session.
    pub fn endpoint_for(&self, session_id: &str) -> RelayResult<Url> {
        if session_id.trim().is_empty() {
            return Err(RelayError::InvalidEndpoint("empty session id".to_string()));
        }

        let mut url = Url::parse(&self.api_base_url)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(RelayError::InvalidEndpoint(format!(
                    "unsupported scheme `{}` in {}",
                    other, self.api_base_url
                )))
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            RelayError::InvalidEndpoint(format!("cannot use {} with {}", scheme, self.api_base_url))
        })?;

        let template = self.path_template()?;

        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                RelayError::InvalidEndpoint(format!("{} cannot carry a path", self.api_base_url))
            })?;
            segments.pop_if_empty();
            for segment in template {
                if segment == SESSION_ID_PLACEHOLDER {
                    segments.push(session_id);
                } else {
                    segments.push(segment);
                }
            }
        }
        url.set_query(None);
        url.set_fragment(None);

        Ok(url)
    }
}

/// What callers observe: the session state plus transport liveness.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Session currently attached, if any.
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub state: SessionState,
    /// Whether a connection is open right now, independent of status.
    pub connected: bool,
}

impl SessionSnapshot {
    fn detached(total_rounds: u32) -> Self {
        Self {
            session_id: None,
            state: SessionState::new(total_rounds),
            connected: false,
        }
    }
}

enum Command {
    Attach {
        session_id: Option<String>,
        done: oneshot::Sender<RelayResult<()>>,
    },
}

enum DriverEvent {
    Opened {
        generation: u64,
        connection: Connection,
        token: Option<String>,
    },
    ConnectFailed {
        generation: u64,
        error: RelayError,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Closed {
        generation: u64,
    },
    ReconnectDue {
        generation: u64,
    },
}

/// Resources held for one attached session.
struct Attachment {
    session_id: String,
    url: Url,
    connecting: Option<JoinHandle<()>>,
    connection: Option<FrameSender>,
    forwarder: Option<JoinHandle<()>>,
}

impl Attachment {
    fn new(session_id: String, url: Url) -> Self {
        Self {
            session_id,
            url,
            connecting: None,
            connection: None,
            forwarder: None,
        }
    }

    /// Forget the current connection; dropping the sender closes it.
    fn drop_connection(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
        self.connection = None;
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.drop_connection();
    }
}

struct SessionDriver {
    config: SessionClientConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialSource>,
    events_tx: mpsc::Sender<DriverEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    generation: u64,
    attachment: Option<Attachment>,
    state: SessionState,
    heartbeat: HeartbeatMonitor,
    reconnect: ReconnectSupervisor,
}

impl SessionDriver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<DriverEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Attach { session_id, done }) => {
                        let result = self.attach(session_id);
                        let _ = done.send(result);
                    }
                    None => {
                        debug!("Session client dropped, stopping driver");
                        self.teardown();
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event).await,
            }
        }
    }

    fn attach(&mut self, session_id: Option<String>) -> RelayResult<()> {
        let Some(session_id) = session_id else {
            self.teardown();
            self.reset_state(None);
            return Ok(());
        };

        if self
            .attachment
            .as_ref()
            .is_some_and(|a| a.session_id == session_id)
        {
            debug!(session_id = %session_id, "Already attached");
            return Ok(());
        }

        self.teardown();
        let url = match self.config.endpoint_for(&session_id) {
            Ok(url) => url,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Cannot derive session endpoint");
                self.reset_state(None);
                return Err(e);
            }
        };

        info!(session_id = %session_id, url = %url, "Attaching to session");
        self.reset_state(Some(session_id.clone()));
        self.attachment = Some(Attachment::new(session_id, url));
        self.begin_connect();
        Ok(())
    }

    /// Release everything tied to the current attachment.
    fn teardown(&mut self) {
        self.generation += 1;
        self.heartbeat.stop();
        self.reconnect.reset();
        if let Some(attachment) = self.attachment.take() {
            info!(session_id = %attachment.session_id, "Detached from session");
        }
    }

    fn reset_state(&mut self, session_id: Option<String>) {
        self.state = SessionState::new(self.config.default_total_rounds);
        let snapshot = SessionSnapshot {
            session_id,
            state: self.state.clone(),
            connected: false,
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    fn begin_connect(&mut self) {
        let Some(attachment) = self.attachment.as_mut() else {
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        let session_id = attachment.session_id.clone();
        let url = attachment.url.clone();
        let connector = self.connector.clone();
        let credentials = self.credentials.clone();
        let events = self.events_tx.clone();

        debug!(session_id = %session_id, generation, "Connecting");
        attachment.connecting = Some(tokio::spawn(async move {
            let attempt = async {
                let connection = connector.connect(&url).await?;
                let token = match credentials.access_token().await {
                    Ok(token) => token,
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "No access token, connecting anyway");
                        None
                    }
                };
                Ok::<_, RelayError>((connection, token))
            };

            // A panicking connector or credential source counts as a failed attempt.
            let event = match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(Ok((connection, token))) => DriverEvent::Opened {
                    generation,
                    connection,
                    token,
                },
                Ok(Err(error)) => DriverEvent::ConnectFailed { generation, error },
                Err(panic) => DriverEvent::ConnectFailed {
                    generation,
                    error: RelayError::Connection(format!(
                        "connect attempt panicked: {}",
                        panic_message(panic.as_ref())
                    )),
                },
            };
            let _ = events.send(event).await;
        }));

        self.state.begin_connecting();
        self.publish();
    }

    async fn handle_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Opened {
                generation,
                connection,
                token,
            } => {
                if self.is_stale(generation) {
                    debug!(generation, "Dropping connection opened for a stale attempt");
                    return;
                }
                self.on_open(generation, connection, token).await;
            }
            DriverEvent::ConnectFailed { generation, error } => {
                if self.is_stale(generation) {
                    return;
                }
                warn!(
                    session_id = self.session_id().unwrap_or_default(),
                    error = %error,
                    "Connect failed"
                );
                self.on_connection_lost();
            }
            DriverEvent::Frame { generation, text } => {
                if self.is_stale(generation) {
                    debug!(generation, "Dropping frame from a stale connection");
                    return;
                }
                self.on_frame(&text);
            }
            DriverEvent::Closed { generation } => {
                if self.is_stale(generation) {
                    return;
                }
                info!(
                    session_id = self.session_id().unwrap_or_default(),
                    "Connection closed"
                );
                self.on_connection_lost();
            }
            DriverEvent::ReconnectDue { generation } => {
                if self.is_stale(generation) {
                    return;
                }
                self.reconnect.mark_fired();
                self.begin_connect();
            }
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        generation != self.generation || self.attachment.is_none()
    }

    fn session_id(&self) -> Option<&str> {
        self.attachment.as_ref().map(|a| a.session_id.as_str())
    }

    async fn on_open(&mut self, generation: u64, connection: Connection, token: Option<String>) {
        let (sender, mut inbound) = connection.into_parts();

        if let Err(e) = sender.send_frame(&OutboundFrame::auth(token)).await {
            // The close event follows through the forwarder.
            warn!(error = %e, "Failed to send auth frame");
        }
        self.heartbeat.start(sender.clone());

        let events = self.events_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                match event {
                    TransportEvent::Message(text) => {
                        if events.send(DriverEvent::Frame { generation, text }).await.is_err() {
                            return;
                        }
                    }
                    TransportEvent::Closed => break,
                }
            }
            let _ = events.send(DriverEvent::Closed { generation }).await;
        });

        if let Some(attachment) = self.attachment.as_mut() {
            attachment.connecting = None;
            attachment.connection = Some(sender);
            attachment.forwarder = Some(forwarder);
            info!(session_id = %attachment.session_id, generation, "Connected");
        }
        self.publish();
    }

    fn on_frame(&mut self, text: &str) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping inbound frame");
                return;
            }
        };

        let kind = frame.kind();
        if let InboundFrame::Error { message } = &frame {
            warn!(
                session_id = self.session_id().unwrap_or_default(),
                message = message.as_deref().unwrap_or("none"),
                "Server reported session error"
            );
        }

        match self.state.apply(frame) {
            Transition::Ignored => {
                debug!(kind, status = %self.state.status, "Frame ignored");
            }
            Transition::Unchanged => {}
            Transition::Updated => self.publish(),
            Transition::Terminal => {
                info!(
                    session_id = self.session_id().unwrap_or_default(),
                    status = %self.state.status,
                    "Session reached terminal status"
                );
                self.publish();
            }
        }
    }

    fn on_connection_lost(&mut self) {
        self.heartbeat.stop();
        if let Some(attachment) = self.attachment.as_mut() {
            attachment.drop_connection();
        }
        self.state.mark_disconnected();

        let generation = self.generation;
        let events = self.events_tx.clone();
        let decision = self.reconnect.on_close(self.state.status, async move {
            let _ = events.send(DriverEvent::ReconnectDue { generation }).await;
        });
        if let ReconnectDecision::Scheduled { attempt, .. } = decision {
            debug!(
                session_id = self.session_id().unwrap_or_default(),
                attempt, "Reconnect scheduled"
            );
        }

        self.publish();
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            session_id: self.attachment.as_ref().map(|a| a.session_id.clone()),
            state: self.state.clone(),
            connected: self
                .attachment
                .as_ref()
                .is_some_and(|a| a.connection.is_some()),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Handle to one realtime session subscription.
///
/// Must be created inside a Tokio runtime. Dropping it stops the driver.
pub struct SessionClient {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    driver: JoinHandle<()>,
}

impl SessionClient {
    /// Create a client using the given transport and credential source.
    pub fn new(
        config: SessionClientConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(DRIVER_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(DRIVER_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshots) =
            watch::channel(SessionSnapshot::detached(config.default_total_rounds));

        let driver = SessionDriver {
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval()),
            reconnect: ReconnectSupervisor::new(config.reconnect_delay()),
            state: SessionState::new(config.default_total_rounds),
            config,
            connector,
            credentials,
            events_tx,
            snapshot_tx,
            generation: 0,
            attachment: None,
        };
        let driver = tokio::spawn(driver.run(command_rx, events_rx));

        Self {
            commands: command_tx,
            snapshots,
            driver,
        }
    }

    /// Create a client that talks WebSocket.
    pub fn with_websocket(
        config: SessionClientConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self::new(config, Arc::new(WsConnector::new()), credentials)
    }

    /// Attach to a session, or release with `None`.
    ///
    /// Attaching to a different session tears the previous one down first;
    /// attaching to the current one is a no-op. Returns once the driver has
    /// applied the change.
    pub async fn attach(&self, session_id: Option<&str>) -> RelayResult<()> {
        let (done, applied) = oneshot::channel();
        self.commands
            .send(Command::Attach {
                session_id: session_id.map(str::to_string),
                done,
            })
            .await
            .map_err(|_| RelayError::ClientStopped)?;
        applied.await.map_err(|_| RelayError::ClientStopped)?
    }

    /// Drop the current session and every timer and connection tied to it.
    pub async fn release(&self) -> RelayResult<()> {
        self.attach(None).await
    }

    /// Receiver that is notified on every observable change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Current observable state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
