//! Application configuration management.
//!
//! Handles loading, saving, and accessing the tether configuration: the
//! endpoint to connect to, heartbeat and reconnection policy, the offline
//! fallback, the connectivity probe and logging. Configuration is persisted
//! as TOML on disk and every field has a default.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants;
use crate::error::{TetherError, TetherResult};
use crate::platform::Platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Endpoint settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Keep-alive ping/pong settings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Reconnection and offline fallback settings.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Connectivity probe settings.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Log every raw frame in and out.
    #[serde(default)]
    pub debug: bool,
}

/// Endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// WebSocket endpoint (e.g., "wss://events.example.com/socket").
    #[serde(default)]
    pub endpoint: String,

    /// Upper bound for establishing the transport, in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Heartbeat configuration. Disabled unless explicitly turned on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Time between pings, in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// How long to wait for the pong after each ping, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,

    /// Literal sent as the ping control frame.
    #[serde(default = "default_ping")]
    pub message: String,

    /// Literal expected back as the pong control frame.
    #[serde(default = "default_pong")]
    pub expected_response: String,
}

/// Reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Reconnect attempts before the session is destroyed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first reconnect; doubles on every further attempt.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Offline delivery fallback.
    #[serde(default)]
    pub fallback: FallbackConfig,
}

/// Offline queue configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Queue outbound events while offline and replay them on reconnect.
    #[serde(default)]
    pub local_events: bool,

    /// When set, replay one queued event per this many milliseconds
    /// instead of flushing the whole queue at once.
    #[serde(default)]
    pub local_events_delay_ms: Option<u64>,
}

/// Connectivity probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Drive the session's online/offline signal from the probe.
    #[serde(default)]
    pub enabled: bool,

    /// URL requested on every check; a 200 response means online.
    #[serde(default = "default_probe_url")]
    pub url: String,

    #[serde(default = "default_probe_interval")]
    pub interval_ms: u64,

    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_connect_timeout() -> u64 {
    constants::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_heartbeat_interval() -> u64 {
    constants::DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_heartbeat_timeout() -> u64 {
    constants::DEFAULT_HEARTBEAT_TIMEOUT_MS
}

fn default_ping() -> String {
    constants::DEFAULT_PING_LITERAL.to_string()
}

fn default_pong() -> String {
    constants::DEFAULT_PONG_LITERAL.to_string()
}

fn default_max_retries() -> u32 {
    constants::DEFAULT_MAX_RETRIES
}

fn default_retry_delay() -> u64 {
    constants::DEFAULT_RETRY_DELAY_MS
}

fn default_probe_url() -> String {
    constants::DEFAULT_PROBE_URL.to_string()
}

fn default_probe_interval() -> u64 {
    constants::DEFAULT_PROBE_INTERVAL_MS
}

fn default_probe_timeout() -> u64 {
    constants::DEFAULT_PROBE_TIMEOUT_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
            message: default_ping(),
            expected_response: default_pong(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            fallback: FallbackConfig::default(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_probe_url(),
            interval_ms: default_probe_interval(),
            timeout_ms: default_probe_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ConnectionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl FallbackConfig {
    /// Pacing interval for replaying queued events, if any.
    pub fn pacing(&self) -> Option<Duration> {
        self.local_events_delay_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> TetherResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> TetherResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| TetherError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> TetherResult<PathBuf> {
        Ok(Platform::config_dir()?.join(constants::CONFIG_FILE_NAME))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> TetherResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(Platform::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check whether an endpoint is configured.
    pub fn is_endpoint_configured(&self) -> bool {
        !self.server.endpoint.is_empty()
    }

    /// Sanitize and normalize an endpoint address.
    ///
    /// Ensures a WebSocket scheme (`http`/`https` map to `ws`/`wss`, a bare
    /// host gets `ws://`) and strips trailing slashes.
    pub fn sanitize_endpoint(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
            trimmed.to_string()
        } else if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access across tasks.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }
}
