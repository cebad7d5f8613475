//! Keep-alive ping scheduling and response deadline.
//!
//! The monitor only tracks deadlines; the session driver awaits them, sends
//! the ping literal and forces the transport closed when a pong is missed.
//! Clearing a deadline is what cancels the corresponding timer.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    enabled: bool,
    interval: Duration,
    timeout: Duration,
    next_ping: Option<Instant>,
    deadline: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(enabled: bool, interval: Duration, timeout: Duration) -> Self {
        Self {
            enabled,
            interval,
            timeout,
            next_ping: None,
            deadline: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Begin pinging: the first ping is due one interval from `now`.
    pub fn start(&mut self, now: Instant) {
        if !self.enabled {
            return;
        }
        debug!("heartbeat started (every {:?}, timeout {:?})", self.interval, self.timeout);
        self.next_ping = Some(now + self.interval);
        self.deadline = None;
    }

    /// Cancel both the repeating ping and any outstanding deadline.
    pub fn stop(&mut self) {
        let was_running = self.next_ping.take().is_some();
        self.deadline = None;
        if was_running {
            debug!("heartbeat stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.next_ping.is_some()
    }

    /// When the next ping is due, if running.
    pub fn next_ping(&self) -> Option<Instant> {
        self.next_ping
    }

    /// When the outstanding ping times out, if one is outstanding.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Record that a ping went out at `now`.
    ///
    /// An already armed deadline is kept rather than pushed back, so a
    /// peer that never answers is caught even when `timeout > interval`.
    pub fn ping_sent(&mut self, now: Instant) {
        if !self.is_running() {
            return;
        }
        self.next_ping = Some(now + self.interval);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.timeout);
        }
        trace!("heartbeat ping sent");
    }

    /// Record a pong. Returns true if it answered an outstanding ping.
    pub fn pong_received(&mut self) -> bool {
        let answered = self.deadline.take().is_some();
        trace!("heartbeat pong received (answered={answered})");
        answered
    }

    /// Consume an elapsed deadline.
    pub fn deadline_elapsed(&mut self) {
        self.deadline = None;
    }
}
