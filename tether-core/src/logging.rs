//! Structured logging setup using the `tracing` ecosystem.
//!
//! Console output always goes to stderr. A daily-rotated file layer is added
//! when a log directory is given, in plain text or JSON.

use std::path::Path;

use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::TetherResult;

/// File name prefix for rotated log files.
const LOG_FILE_PREFIX: &str = "tether.log";

/// Guard that keeps the non-blocking log writer alive.
/// Drop this to flush and close the log file.
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber.
///
/// * `level` - filter directive, e.g. "info" or "tether_socket=debug,info"
/// * `log_dir` - directory for rotated log files; `None` logs to the console only
/// * `json_output` - write the file layer as JSON lines
pub fn init_logging(level: &str, log_dir: Option<&Path>, json_output: bool) -> TetherResult<LogGuard> {
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .boxed();

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, LOG_FILE_PREFIX));
            let layer = if json_output {
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .with_file(true)
                    .with_line_number(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true)
                    .boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| crate::error::TetherError::Internal(format!("logging already initialized: {e}")))?;

    match log_dir {
        Some(dir) => tracing::debug!("logging initialized at level={level}, dir={}", dir.display()),
        None => tracing::debug!("logging initialized at level={level}, console only"),
    }

    Ok(LogGuard { _guard: guard })
}

/// Initialize a minimal console-only logger for tests or quick tools.
///
/// Subsequent calls are no-ops.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_target(true).compact())
        .try_init();
}
