//! Subcommand implementations.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use client_config_and_utils::Config;
use feed_dedup::{
    AlertSink, CacheInvalidator, CacheScope, ChangeNotification, Clock, DedupConfig, FeedEvent,
    FeedRouter, RouteOutcome,
};
use parking_lot::Mutex;
use serde_json::json;
use session_relay::{EnvCredentials, SessionClient, SessionClientConfig, SessionSnapshot};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

pub fn session_client_config(config: &Config) -> SessionClientConfig {
    SessionClientConfig {
        api_base_url: config.api_base_url.clone(),
        session_path: config.session_path.clone(),
        heartbeat_interval_secs: config.heartbeat_interval_secs,
        reconnect_delay_secs: config.reconnect_delay_secs,
        default_total_rounds: config.default_total_rounds,
    }
}

/// Validate the loaded config, including the session endpoint template.
pub fn validate_config(config: &Config) -> anyhow::Result<()> {
    config.validate()?;
    session_client_config(config)
        .validate()
        .context("invalid session endpoint settings")?;
    Ok(())
}

pub fn dedup_config(config: &Config) -> DedupConfig {
    DedupConfig {
        request_window: config.dedup_request_window(),
        message_window: config.dedup_message_window(),
        capacity: config.dedup_capacity,
    }
}

/// Follow one session until it ends or the user interrupts.
pub async fn run_watch(config: &Config, session_id: &str, token_env: &str) -> anyhow::Result<()> {
    let credentials = Arc::new(EnvCredentials::new(token_env));
    let client = SessionClient::with_websocket(session_client_config(config), credentials);
    let mut updates = client.subscribe();

    client
        .attach(Some(session_id))
        .await
        .with_context(|| format!("attaching to session {}", session_id))?;
    info!(session_id = %session_id, "Watching session");

    let outcome = tokio::select! {
        result = print_until_terminal(&mut updates, io::stdout()) => result.map(|snapshot| {
            info!(session_id = %session_id, status = %snapshot.state.status, "Session ended");
        }),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    client.release().await?;
    outcome
}

/// Print a JSON line per snapshot until the status is terminal.
pub async fn print_until_terminal<W: Write>(
    updates: &mut watch::Receiver<SessionSnapshot>,
    mut out: W,
) -> anyhow::Result<SessionSnapshot> {
    loop {
        let snapshot = updates.borrow_and_update().clone();
        writeln!(out, "{}", serde_json::to_string(&snapshot)?)?;
        out.flush()?;

        if snapshot.state.status.is_terminal() {
            return Ok(snapshot);
        }
        updates
            .changed()
            .await
            .context("session client stopped")?;
    }
}

/// Writes alerts and invalidations as JSON lines.
pub struct JsonLineSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLineSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn emit(&self, line: serde_json::Value) {
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!(error = %e, "Failed to write feed output");
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> AlertSink for JsonLineSink<W> {
    fn alert(&self, event: &FeedEvent) {
        self.emit(json!({ "type": "alert", "key": event.dedup_key() }));
    }
}

impl<W: Write + Send> CacheInvalidator for JsonLineSink<W> {
    fn invalidate(&self, scope: &CacheScope) {
        self.emit(json!({ "type": "invalidate", "scope": scope.to_string() }));
    }
}

/// Counts from one feed run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FeedSummary {
    pub lines: usize,
    pub alerted: usize,
    pub suppressed: usize,
    pub invalidated: usize,
    pub ignored: usize,
    pub rejected: usize,
}

/// Route stdin notifications until EOF.
pub async fn run_feed(config: &Config) -> anyhow::Result<FeedSummary> {
    let sink = Arc::new(JsonLineSink::new(io::stdout()));
    let router = FeedRouter::new(dedup_config(config), sink.clone(), sink);
    process_feed(&router, BufReader::new(tokio::io::stdin()), Duration::from_secs(30)).await
}

/// Route every JSON line from `reader`. Bad lines are logged and skipped.
/// Expired dedup entries are purged every `purge_every`.
pub async fn process_feed<C, R>(
    router: &FeedRouter<C>,
    reader: R,
    purge_every: Duration,
) -> anyhow::Result<FeedSummary>
where
    C: Clock,
    R: AsyncBufRead + Unpin,
{
    let mut summary = FeedSummary::default();
    let mut lines = reader.lines();
    let mut purge = tokio::time::interval(purge_every);
    purge.tick().await;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading feed input")?,
            _ = purge.tick() => {
                let purged = router.deduplicator().purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired dedup entries");
                }
                continue;
            }
        };
        let Some(line) = line else {
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        summary.lines += 1;

        let routed = ChangeNotification::from_json(line).and_then(|n| router.handle(&n));
        match routed {
            Ok(RouteOutcome::Alerted(_)) => summary.alerted += 1,
            Ok(RouteOutcome::Suppressed(_)) => summary.suppressed += 1,
            Ok(RouteOutcome::Invalidated(_)) => summary.invalidated += 1,
            Ok(RouteOutcome::Ignored) => summary.ignored += 1,
            Err(e) => {
                warn!(line = summary.lines, error = %e, "Skipping notification");
                summary.rejected += 1;
            }
        }
    }

    Ok(summary)
}
