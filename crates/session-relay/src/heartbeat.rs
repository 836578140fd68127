//! Keep-alive pings for an open connection.

use crate::messages::OutboundFrame;
use crate::transport::FrameSender;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};
use tracing::{debug, warn};

/// Sends a `ping` frame on a fixed period while armed.
///
/// One monitor serves one connection at a time: `start` on open, `stop` on
/// close. Starting an already running monitor is refused.
pub struct HeartbeatMonitor {
    period: Duration,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    pub fn new(period: Duration) -> Self {
        Self { period, task: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Arm the monitor. Returns false if it was already running.
    pub fn start(&mut self, sender: FrameSender) -> bool {
        if self.is_running() {
            warn!("Heartbeat already running, refusing second start");
            return false;
        }

        let period = self.period;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if let Err(e) = sender.send_frame(&OutboundFrame::ping()).await {
                    debug!(error = %e, "Heartbeat send failed, stopping");
                    break;
                }
            }
        }));
        true
    }

    /// Disarm the monitor. Returns false if it was not running.
    pub fn stop(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
