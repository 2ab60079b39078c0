//! Heartbeat echo and inbound liveness tracking.
//!
//! The coordinator probes with `hb|<nonce>` and expects the same frame back.
//! Independently, the read loop treats a connection that has delivered no
//! frame of any kind for the idle window as half-open.

use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::Reply;

/// Idle deadline for one connection.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    idle_window: Duration,
    last_activity: Instant,
    frames_seen: u64,
}

impl HeartbeatMonitor {
    /// Start tracking with the deadline one idle window from now.
    #[must_use]
    pub fn new(idle_window: Duration) -> Self {
        Self {
            idle_window,
            last_activity: Instant::now(),
            frames_seen: 0,
        }
    }

    /// Echo a heartbeat probe. Pure.
    #[must_use]
    pub fn on_heartbeat(nonce: String) -> Reply {
        Reply::HeartbeatEcho { nonce }
    }

    /// Push the deadline back after any inbound frame.
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
        self.frames_seen += 1;
    }

    /// Instant after which the connection counts as idle.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.last_activity + self.idle_window
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        Instant::now() >= self.deadline()
    }

    /// Inbound frames recorded so far.
    #[must_use]
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// The configured idle window.
    #[must_use]
    pub fn idle_window(&self) -> Duration {
        self.idle_window
    }
}
