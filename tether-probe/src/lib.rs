//! Tether Probe - polling connectivity monitor.
//!
//! Periodically checks that a well-known URL is reachable and reports
//! online/offline transitions plus round-trip latency. A running monitor
//! can hand out a `ConnectivitySignal` for sessions to consume.

pub mod check;
pub mod monitor;

pub use check::{HttpCheck, ReachabilityCheck};
pub use monitor::{LinkTracker, NetworkEvent, NetworkMonitor};
