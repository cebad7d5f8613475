//! Application-wide constants.

/// Application name, used for config and data directories.
pub const APP_NAME: &str = "tether";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Config file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Reserved handshake event carrying the server-assigned session id.
pub const MOUNTED_EVENT: &str = "mounted";

/// Suffix appended to an event name to form its default ack event.
pub const ACK_SUFFIX: &str = "-ack";

/// Default heartbeat control literals.
pub const DEFAULT_PING_LITERAL: &str = "ping";
pub const DEFAULT_PONG_LITERAL: &str = "pong";

/// Default heartbeat timings in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 10_000;

/// Default reconnection policy.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Default transport connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;

/// Default connectivity probe target and cadence.
pub const DEFAULT_PROBE_URL: &str = "https://www.google.com";
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 10_000;

/// Capacity of the session lifecycle broadcast channel.
pub const SESSION_EVENT_CAPACITY: usize = 64;
