//! Reachability checks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::trace;

use tether_core::error::{TetherError, TetherResult};

/// One reachability probe.
///
/// Returns the round-trip latency when the target is reachable.
#[async_trait]
pub trait ReachabilityCheck: Send + Sync + 'static {
    async fn check(&self) -> TetherResult<Duration>;
}

/// HTTP GET against a fixed URL; only `200 OK` counts as reachable.
#[derive(Clone)]
pub struct HttpCheck {
    client: Client,
    url: String,
}

impl HttpCheck {
    pub fn new(url: impl Into<String>, timeout: Duration) -> TetherResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| TetherError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReachabilityCheck for HttpCheck {
    async fn check(&self) -> TetherResult<Duration> {
        let start = Instant::now();
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(classify_error)?;
        let elapsed = start.elapsed();

        let status = response.status();
        trace!("probe {} -> {status} in {elapsed:?}", self.url);
        if status == StatusCode::OK {
            Ok(elapsed)
        } else {
            Err(TetherError::Http(format!("{} answered {status}", self.url)))
        }
    }
}

fn classify_error(e: reqwest::Error) -> TetherError {
    if e.is_timeout() {
        TetherError::Http(format!("probe timed out: {e}"))
    } else if e.is_connect() {
        TetherError::Http(format!("connection failed: {e}"))
    } else {
        TetherError::Http(e.to_string())
    }
}
