//! Probe command - watch reachability transitions and latency.

use console::style;
use serde_json::json;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use tether_core::config::ConfigHandle;
use tether_core::error::{TetherError, TetherResult};
use tether_probe::{NetworkEvent, NetworkMonitor};

use super::format_latency;
use crate::OutputFormat;

fn print_event(format: OutputFormat, event: &NetworkEvent) {
    match (format, event) {
        (OutputFormat::Json, NetworkEvent::Online) => println!("{}", json!({"network": "online"})),
        (OutputFormat::Json, NetworkEvent::Offline) => println!("{}", json!({"network": "offline"})),
        (OutputFormat::Json, NetworkEvent::Quality { latency }) => println!(
            "{}",
            json!({"network": "quality", "latency_ms": latency.as_millis() as u64})
        ),
        (OutputFormat::Text, NetworkEvent::Online) => {
            println!("  {} Network is reachable", style("ONLINE").green().bold())
        }
        (OutputFormat::Text, NetworkEvent::Offline) => {
            println!("  {} Network is unreachable", style("OFFLINE").red().bold())
        }
        (OutputFormat::Text, NetworkEvent::Quality { latency }) => {
            println!("  {} {}", style("latency").dim(), format_latency(*latency))
        }
    }
}

/// Run the probe command.
pub async fn run(
    config: ConfigHandle,
    url: Option<String>,
    interval_ms: Option<u64>,
    count: Option<u32>,
    format: OutputFormat,
) -> TetherResult<()> {
    let probe = {
        let mut cfg = config.write().await;
        if let Some(url) = url {
            cfg.probe.url = url;
        }
        if let Some(ms) = interval_ms {
            cfg.probe.interval_ms = ms;
        }
        cfg.probe.clone()
    };
    if probe.interval_ms == 0 {
        return Err(TetherError::Config("probe interval must be positive".into()));
    }

    let monitor = NetworkMonitor::from_config(&probe)?;
    debug!("probe target {} (timeout {}ms)", probe.url, probe.timeout_ms);
    if format == OutputFormat::Text {
        println!(
            "Probing {} every {}",
            style(&probe.url).bold(),
            format_latency(monitor.interval())
        );
    }

    // The monitor assumes online at start, so report the first result either way.
    let first = monitor.check_now().await;
    if !first.contains(&NetworkEvent::Offline) && format == OutputFormat::Text {
        print_event(format, &NetworkEvent::Online);
    }
    for event in &first {
        print_event(format, event);
    }

    let mut remaining = count.map(|n| n.saturating_sub(1));
    if remaining == Some(0) {
        return Ok(());
    }

    let mut ticker = interval_at(Instant::now() + monitor.interval(), monitor.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for event in monitor.check_now().await {
                    print_event(format, &event);
                }
                if let Some(left) = remaining.as_mut() {
                    *left -= 1;
                    if *left == 0 {
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}
