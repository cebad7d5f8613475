//! Tether Socket - resilient event-multiplexing session over a text-frame transport.
//!
//! This crate provides the session layer that handles:
//! - `[event, payload]` framing plus ping/pong control literals
//! - Per-event handlers with acks and batching cycles
//! - Heartbeat with a forced close on a missed pong
//! - Reconnection with exponential backoff and a bounded attempt budget
//! - An offline queue replayed in order once reconnected
//! - A WebSocket transport over tokio-tungstenite

pub mod backoff;
pub mod codec;
pub mod cycle;
pub mod events;
pub mod handler;
pub mod heartbeat;
pub mod options;
pub mod queue;
pub mod registry;
pub mod session;
pub mod transport;
pub mod ws;

// Re-export key types
pub use codec::{Frame, WireCodec};
pub use events::{SessionEvent, SessionEvents, SessionState};
pub use handler::{AckPolicy, CyclePolicy, HandlerConfig, HandlerDescriptor};
pub use options::{HeartbeatOptions, SessionOptions};
pub use registry::{Dispatch, HandlerInfo, HandlerRegistry};
pub use session::{Session, SessionSnapshot, WeakSession};
pub use transport::{Connector, Transport, TransportEvent, TransportEventSender};
pub use ws::WsConnector;
