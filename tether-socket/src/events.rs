//! Session state and lifecycle event broadcasting.
//!
//! Consumers that only care about "is it connected" watch the state
//! channel on the session handle; everything else (handshakes, faults,
//! reconnect scheduling, destruction) is fanned out here.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use tether_core::error::TetherError;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// A transport is being opened.
    Connecting,
    /// The transport is open.
    Connected,
    /// Connection lost; a reconnect is scheduled.
    Reconnecting,
    /// Terminal. Nothing happens after this.
    Destroyed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Lifecycle notifications published by a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// The server completed the handshake and assigned an id.
    Mounted { id: String, at: DateTime<Utc> },
    /// A reconnect attempt was scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    /// Something went wrong. Fatal faults are followed by `Destroyed`.
    Fault { fatal: bool, error: Arc<TetherError> },
    Destroyed { reason: String },
}

impl SessionEvent {
    pub fn fault(error: TetherError) -> Self {
        Self::Fault {
            fatal: error.is_fatal(),
            error: Arc::new(error),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::StateChanged(_) => "state-changed",
            Self::Mounted { .. } => "mounted",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Fault { .. } => "fault",
            Self::Destroyed { .. } => "destroyed",
        }
    }
}

/// Broadcast fan-out of [`SessionEvent`]s.
///
/// Slow subscribers that fall behind receive `RecvError::Lagged` and skip
/// ahead; the session never blocks on them.
#[derive(Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(count) => trace!("session event {kind} sent to {count} subscriber(s)"),
            Err(_) => trace!("no subscribers for session event {kind}"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
