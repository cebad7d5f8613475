//! Transport contract consumed by the session.
//!
//! A transport is a single bidirectional text-frame channel. Connecting is
//! non-blocking: the connector hands back a [`Transport`] right away and
//! reports `Open`, inbound messages, `Close` and `Error` on the event
//! channel it was given. Dropping that channel's receiver detaches every
//! listener of that transport.

use tokio::sync::mpsc;

use tether_core::error::TetherResult;

/// Lifecycle and data signals raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
    Error(String),
}

/// Sending half of a transport's event channel.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// An established (or establishing) connection.
pub trait Transport: Send {
    /// Queue one text frame.
    fn send(&mut self, text: String) -> TetherResult<()>;

    /// Ask the transport to close. Calling it more than once is harmless.
    fn close(&mut self);

    /// Whether frames can currently be sent.
    fn is_open(&self) -> bool;
}

/// Factory for transports to a given endpoint.
pub trait Connector: Send + 'static {
    fn connect(&mut self, endpoint: &str, events: TransportEventSender) -> Box<dyn Transport>;
}
