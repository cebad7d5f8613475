//! Connect command - open a session, print handled events, send from stdin.

use std::collections::BTreeMap;
use std::path::Path;

use clap::Args;
use console::style;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use tether_core::config::{AppConfig, ConfigHandle};
use tether_core::connectivity::ConnectivitySignal;
use tether_core::error::{TetherError, TetherResult};
use tether_probe::NetworkMonitor;
use tether_socket::{
    AckPolicy, CyclePolicy, HandlerDescriptor, Session, SessionEvent, SessionOptions, WsConnector,
};

use crate::OutputFormat;

#[derive(Args, Debug, Default)]
pub struct ConnectArgs {
    /// Endpoint to connect to (overrides config).
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Print payloads of this event. Repeatable.
    #[arg(long = "on", value_name = "EVENT")]
    pub on: Vec<String>,

    /// Acknowledge this event with `<EVENT>-ack`. Repeatable.
    #[arg(long = "ack", value_name = "EVENT")]
    pub ack: Vec<String>,

    /// Batch this event every N payloads, as EVENT=N. Repeatable.
    #[arg(long = "cycle", value_name = "EVENT=N")]
    pub cycle: Vec<String>,

    /// Enable the heartbeat regardless of config.
    #[arg(long)]
    pub heartbeat: bool,

    /// Queue sends while offline and replay them on reconnect.
    #[arg(long)]
    pub fallback: bool,

    /// Follow network reachability with the probe.
    #[arg(long)]
    pub probe: bool,

    /// Save the effective settings to the config file.
    #[arg(long)]
    pub save: bool,
}

/// Parse an `EVENT=N` cycle flag.
pub fn parse_cycle(flag: &str) -> TetherResult<(String, usize)> {
    let (event, every) = flag
        .split_once('=')
        .ok_or_else(|| TetherError::Config(format!("cycle '{flag}' must look like EVENT=N")))?;
    let event = event.trim();
    if event.is_empty() {
        return Err(TetherError::Config(format!("cycle '{flag}' has no event name")));
    }
    let every = every
        .trim()
        .parse::<usize>()
        .map_err(|e| TetherError::Config(format!("cycle '{flag}': {e}")))?;
    Ok((event.to_string(), every))
}

/// Parse a stdin line `EVENT [JSON]` into an outbound event.
///
/// A missing payload is `null`; a payload that is not valid JSON is sent as
/// a string.
pub fn parse_outbound(line: &str) -> Option<(String, Value)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (event, rest) = match line.split_once(char::is_whitespace) {
        Some((event, rest)) => (event, rest.trim()),
        None => (line, ""),
    };
    let payload = if rest.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(rest).unwrap_or_else(|_| Value::String(rest.to_string()))
    };
    Some((event.to_string(), payload))
}

fn print_event(format: OutputFormat, event: &str, payload: &Value) {
    match format {
        OutputFormat::Json => println!("{}", json!({"event": event, "payload": payload})),
        OutputFormat::Text => println!(
            "  {} {}",
            style(format!("[{event}]")).cyan(),
            super::truncate(&payload.to_string(), 200)
        ),
    }
}

fn print_batch(format: OutputFormat, event: &str, batch: &[Value]) {
    match format {
        OutputFormat::Json => println!("{}", json!({"event": event, "batch": batch})),
        OutputFormat::Text => println!(
            "  {} {} payload(s)",
            style(format!("[{event} x{}]", batch.len())).magenta(),
            batch.len()
        ),
    }
}

/// Build one descriptor per event from the `--on`, `--ack` and `--cycle` flags.
fn build_handlers(args: &ConnectArgs, format: OutputFormat) -> TetherResult<BTreeMap<String, HandlerDescriptor>> {
    let mut handlers: BTreeMap<String, HandlerDescriptor> = BTreeMap::new();

    for event in args.on.iter().chain(args.ack.iter()) {
        let name = event.clone();
        let descriptor = handlers.remove(event).unwrap_or_default();
        handlers.insert(
            event.clone(),
            descriptor.callback(move |payload| print_event(format, &name, &payload)),
        );
    }

    for event in &args.ack {
        let descriptor = handlers.remove(event).unwrap_or_default();
        handlers.insert(event.clone(), descriptor.ack(AckPolicy::new()));
    }

    for flag in &args.cycle {
        let (event, every) = parse_cycle(flag)?;
        let name = event.clone();
        let policy = CyclePolicy::every(every, move |batch| print_batch(format, &name, &batch))?;
        let descriptor = handlers.remove(&event).unwrap_or_default();
        handlers.insert(event, descriptor.cycle(policy));
    }

    Ok(handlers)
}

fn report(format: OutputFormat, event: &SessionEvent) {
    if format == OutputFormat::Json {
        let line = match event {
            SessionEvent::StateChanged(state) => json!({"session": "state", "state": state}),
            SessionEvent::Mounted { id, at } => json!({"session": "mounted", "id": id, "at": at.to_rfc3339()}),
            SessionEvent::Reconnecting { attempt, delay } => {
                json!({"session": "reconnecting", "attempt": attempt, "delay_ms": delay.as_millis() as u64})
            }
            SessionEvent::Fault { fatal, error } => {
                json!({"session": "fault", "fatal": fatal, "error": error.to_string()})
            }
            SessionEvent::Destroyed { reason } => json!({"session": "destroyed", "reason": reason}),
        };
        println!("{line}");
        return;
    }

    match event {
        SessionEvent::StateChanged(state) => {
            println!("  {} {state}", style("state").dim());
        }
        SessionEvent::Mounted { id, .. } => {
            println!("  {} Mounted as {}", style("OK").green().bold(), style(id).bold());
        }
        SessionEvent::Reconnecting { attempt, delay } => {
            println!(
                "  {} Reconnect attempt {attempt} in {}",
                style("WAIT").yellow(),
                super::format_latency(*delay)
            );
        }
        SessionEvent::Fault { fatal: true, error } => {
            println!("  {} {error}", style("FATAL").red().bold());
        }
        SessionEvent::Fault { fatal: false, error } => {
            println!("  {} {error}", style("WARN").yellow());
        }
        SessionEvent::Destroyed { reason } => {
            println!("  {} Session closed: {reason}", style("DONE").dim());
        }
    }
}

/// Run the connect command.
pub async fn run(
    config: ConfigHandle,
    config_path: &Path,
    args: ConnectArgs,
    format: OutputFormat,
) -> TetherResult<()> {
    {
        let mut cfg = config.write().await;
        if let Some(endpoint) = &args.endpoint {
            cfg.server.endpoint = AppConfig::sanitize_endpoint(endpoint);
        }
        if args.heartbeat {
            cfg.heartbeat.enabled = true;
        }
        if args.fallback {
            cfg.connection.fallback.local_events = true;
        }
        if args.probe {
            cfg.probe.enabled = true;
        }
    }

    let cfg = config.read().await.clone();
    let options = SessionOptions::from_config(&cfg)?;
    let handlers = build_handlers(&args, format)?;

    if args.save {
        cfg.save_to_file(config_path)?;
        if format == OutputFormat::Text {
            println!("  {} Config saved to {}", style("OK").green(), config_path.display());
        }
    }

    // Keep the monitor alive for as long as the session runs.
    let monitor = if cfg.probe.enabled {
        let monitor = NetworkMonitor::from_config(&cfg.probe)?;
        monitor.start();
        Some(monitor)
    } else {
        None
    };
    let connectivity = monitor
        .as_ref()
        .map(NetworkMonitor::signal)
        .unwrap_or_else(ConnectivitySignal::always_online);

    if format == OutputFormat::Text {
        println!("{} Connecting to {}...", style("[1/2]").bold().dim(), options.endpoint);
    }

    let session = Session::spawn(options, WsConnector::new(cfg.server.connect_timeout()), connectivity)?;
    let mut events = session.subscribe();
    for (event, descriptor) in handlers {
        debug!("registering handler for '{event}'");
        session.on(event, descriptor)?;
    }
    session.connect()?;

    if format == OutputFormat::Text {
        println!(
            "{} Listening. Type `EVENT JSON` to send; Ctrl+C to stop.",
            style("[2/2]").bold().dim()
        );
        println!();
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => report(format, &event),
                Err(RecvError::Lagged(n)) => warn!("missed {n} session events (slow consumer)"),
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Some((event, payload)) = parse_outbound(&line) {
                        if let Err(e) = session.send(event, payload) {
                            warn!("send failed: {e}");
                        }
                    }
                }
                Ok(None) => {
                    debug!("stdin closed; still listening");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("stdin read failed: {e}");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                if format == OutputFormat::Text {
                    println!("\n  Disconnecting...");
                }
                session.destroy("interrupted");
                session.closed().await;
                break;
            }
            _ = session.closed() => break,
        }
    }

    // Print whatever the session reported on its way down.
    while let Ok(event) = events.try_recv() {
        report(format, &event);
    }

    if let Some(monitor) = monitor {
        monitor.stop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cycle() {
        assert_eq!(parse_cycle("tick=3").unwrap(), ("tick".to_string(), 3));
        assert_eq!(parse_cycle(" tick = 10 ").unwrap(), ("tick".to_string(), 10));
        assert!(parse_cycle("tick").is_err());
        assert!(parse_cycle("=3").is_err());
        assert!(parse_cycle("tick=x").is_err());
    }

    #[test]
    fn test_parse_outbound() {
        assert_eq!(
            parse_outbound("chat {\"text\":\"hi\"}"),
            Some(("chat".to_string(), json!({"text": "hi"})))
        );
        assert_eq!(parse_outbound("ping-me"), Some(("ping-me".to_string(), Value::Null)));
        assert_eq!(
            parse_outbound("note hello there"),
            Some(("note".to_string(), json!("hello there")))
        );
        assert_eq!(parse_outbound("   "), None);
        assert_eq!(parse_outbound("# comment"), None);
    }

    #[test]
    fn test_build_handlers_merges_flags() {
        let args = ConnectArgs {
            on: vec!["chat".into()],
            ack: vec!["chat".into(), "order".into()],
            cycle: vec!["tick=2".into()],
            ..Default::default()
        };
        let handlers = build_handlers(&args, OutputFormat::Json).unwrap();
        assert_eq!(
            handlers.keys().cloned().collect::<Vec<_>>(),
            vec!["chat", "order", "tick"]
        );
    }

    #[test]
    fn test_zero_cycle_is_rejected() {
        let args = ConnectArgs {
            cycle: vec!["tick=0".into()],
            ..Default::default()
        };
        assert!(build_handlers(&args, OutputFormat::Text).is_err());
    }
}
