//! Global error types for tether.
//!
//! All error categories across the workspace are unified into a single
//! `TetherError` enum with conversions from underlying library errors.

use std::time::Duration;

use thiserror::Error;

/// Convenience type alias for Results using TetherError.
pub type TetherResult<T> = Result<T, TetherError>;

/// Unified error type covering all error categories in tether.
#[derive(Error, Debug)]
pub enum TetherError {
    // -- Configuration errors --
    /// Failed to load, parse or validate configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Network errors --
    /// HTTP request failed.
    #[error("http error: {0}")]
    Http(String),

    /// The underlying transport failed to connect, send or stay open.
    #[error("transport error: {0}")]
    Transport(String),

    // -- Session protocol errors --
    /// An inbound frame could not be decoded into an event.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A handler is registered but has nothing to invoke.
    #[error("handler for '{0}' has no callback, ack or cycle configured")]
    UnconfiguredHandler(String),

    /// The `mounted` handshake did not carry a session identifier.
    #[error("handshake failed: {0}")]
    HandshakeFailure(String),

    /// No pong arrived before the heartbeat deadline.
    #[error("no heartbeat response within {0:?}")]
    HeartbeatTimeout(Duration),

    /// The reconnection budget is spent.
    #[error("gave up reconnecting after {0} attempt(s)")]
    RetriesExhausted(u32),

    /// The session was destroyed and accepts no more work.
    #[error("session destroyed")]
    SessionDestroyed,

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TetherError {
    /// Whether this error ends the session for good.
    ///
    /// Fatal conditions drive the session to its terminal state; everything
    /// else is logged and the session keeps processing frames.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::HandshakeFailure(_) | Self::RetriesExhausted(_) | Self::SessionDestroyed
        )
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(e: serde_json::Error) -> Self {
        TetherError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for TetherError {
    fn from(e: toml::de::Error) -> Self {
        TetherError::Config(e.to_string())
    }
}
