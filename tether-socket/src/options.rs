//! Session construction options.

use std::time::Duration;

use tether_core::config::AppConfig;
use tether_core::constants;
use tether_core::error::{TetherError, TetherResult};

/// Keep-alive settings.
#[derive(Debug, Clone)]
pub struct HeartbeatOptions {
    pub enabled: bool,
    pub interval: Duration,
    pub timeout: Duration,
    pub ping: String,
    pub pong: String,
}

impl Default for HeartbeatOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_millis(constants::DEFAULT_HEARTBEAT_INTERVAL_MS),
            timeout: Duration::from_millis(constants::DEFAULT_HEARTBEAT_TIMEOUT_MS),
            ping: constants::DEFAULT_PING_LITERAL.to_string(),
            pong: constants::DEFAULT_PONG_LITERAL.to_string(),
        }
    }
}

/// Everything a session needs to know up front.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub endpoint: String,
    pub heartbeat: HeartbeatOptions,
    /// Reconnect attempts before the session gives up and is destroyed.
    pub max_retries: u32,
    /// Delay before the first reconnect; doubles on every further attempt.
    pub retry_delay: Duration,
    /// Queue outbound events while disconnected and replay them later.
    pub fallback: bool,
    /// Replay one queued event per interval instead of all at once.
    pub fallback_pacing: Option<Duration>,
    /// Log every frame in and out at debug level.
    pub debug: bool,
}

impl SessionOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            heartbeat: HeartbeatOptions::default(),
            max_retries: constants::DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(constants::DEFAULT_RETRY_DELAY_MS),
            fallback: false,
            fallback_pacing: None,
            debug: false,
        }
    }

    /// Build options from the application config.
    pub fn from_config(config: &AppConfig) -> TetherResult<Self> {
        if !config.is_endpoint_configured() {
            return Err(TetherError::MissingConfig("server.endpoint".into()));
        }

        let hb = &config.heartbeat;
        let options = Self {
            endpoint: AppConfig::sanitize_endpoint(&config.server.endpoint),
            heartbeat: HeartbeatOptions {
                enabled: hb.enabled,
                interval: hb.interval(),
                timeout: hb.timeout(),
                ping: hb.message.clone(),
                pong: hb.expected_response.clone(),
            },
            max_retries: config.connection.max_retries,
            retry_delay: config.connection.retry_delay(),
            fallback: config.connection.fallback.local_events,
            fallback_pacing: config.connection.fallback.pacing(),
            debug: config.debug,
        };
        options.validate()?;
        Ok(options)
    }

    /// Turn the heartbeat on with the given timings.
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat.enabled = true;
        self.heartbeat.interval = interval;
        self.heartbeat.timeout = timeout;
        self
    }

    pub fn with_control_literals(mut self, ping: impl Into<String>, pong: impl Into<String>) -> Self {
        self.heartbeat.ping = ping.into();
        self.heartbeat.pong = pong.into();
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Enable the offline queue, optionally paced.
    pub fn with_fallback(mut self, pacing: Option<Duration>) -> Self {
        self.fallback = true;
        self.fallback_pacing = pacing.filter(|p| !p.is_zero());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn validate(&self) -> TetherResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(TetherError::MissingConfig("endpoint".into()));
        }
        if self.retry_delay.is_zero() {
            return Err(TetherError::Config("retry delay must be greater than zero".into()));
        }
        let hb = &self.heartbeat;
        if hb.ping.is_empty() || hb.pong.is_empty() {
            return Err(TetherError::Config("ping and pong literals must not be empty".into()));
        }
        if hb.ping == hb.pong {
            return Err(TetherError::Config(format!(
                "ping and pong literals must differ (both are '{}')",
                hb.ping
            )));
        }
        if hb.enabled && (hb.interval.is_zero() || hb.timeout.is_zero()) {
            return Err(TetherError::Config(
                "heartbeat interval and timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
