//! Reconnect supervisor.
//!
//! Retries use a fixed delay and no attempt cap: the loop only ends when the
//! session reaches a terminal status or the attachment is torn down.

use crate::state::SessionStatus;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info};

/// What the supervisor did about a closed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Session is terminal; the connection stays down.
    Suppressed,
    /// A reconnect will fire after `delay`.
    Scheduled { attempt: u64, delay: Duration },
    /// A reconnect was already waiting; nothing new scheduled.
    AlreadyPending,
}

/// Schedules at most one pending reconnect at a time.
pub struct ReconnectSupervisor {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
    attempts: u64,
}

impl ReconnectSupervisor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            attempts: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Decide what to do after a close. `fire` runs once the delay elapses.
    pub fn on_close<F>(&mut self, status: SessionStatus, fire: F) -> ReconnectDecision
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if status.is_terminal() {
            debug!(status = %status, "Session is terminal, not reconnecting");
            return ReconnectDecision::Suppressed;
        }

        if self.is_pending() {
            return ReconnectDecision::AlreadyPending;
        }

        self.attempts += 1;
        let delay = self.delay;
        info!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire.await;
        }));

        ReconnectDecision::Scheduled {
            attempt: self.attempts,
            delay,
        }
    }

    /// The scheduled reconnect has been acted on.
    pub fn mark_fired(&mut self) {
        self.pending = None;
    }

    /// Drop any pending reconnect. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(task) => {
                let was_pending = !task.is_finished();
                task.abort();
                was_pending
            }
            None => false,
        }
    }

    /// Cancel and forget the attempt count.
    pub fn reset(&mut self) {
        self.cancel();
        self.attempts = 0;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Reconnects scheduled since the last reset.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.cancel();
    }
}
