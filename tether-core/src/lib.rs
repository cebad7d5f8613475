//! Tether Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by all other tether crates:
//! - Application configuration (endpoint, heartbeat, reconnection, probe)
//! - Global error type covering transport, protocol and session failures
//! - Structured logging with tracing
//! - Platform directory lookup
//! - The connectivity signal consumed by sessions and fed by the probe

pub mod config;
pub mod connectivity;
pub mod constants;
pub mod error;
pub mod logging;
pub mod platform;

// Re-export commonly used items at the crate root
pub use config::AppConfig;
pub use connectivity::ConnectivitySignal;
pub use error::{TetherError, TetherResult};
pub use logging::init_logging;
pub use platform::Platform;
