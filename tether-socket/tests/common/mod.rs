//! Shared test utilities for session integration tests.
//!
//! `MockNetwork` stands in for the server side: every `connect` the session
//! makes becomes a scripted link the test can open, feed frames into,
//! drop or fail. Frames the session writes are recorded in send order.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use tether_core::connectivity::{ConnectivityFeed, ConnectivitySignal};
use tether_core::error::{TetherError, TetherResult};
use tether_socket::{
    Connector, Session, SessionEvent, SessionOptions, Transport, TransportEvent,
    TransportEventSender,
};

pub const ENDPOINT: &str = "ws://mock.test/socket";

struct MockLink {
    events: TransportEventSender,
    open: Arc<AtomicBool>,
}

#[derive(Default)]
struct Shared {
    links: Vec<MockLink>,
    sent: Vec<String>,
    endpoints: Vec<String>,
}

/// Scripted in-memory server.
#[derive(Clone, Default)]
pub struct MockNetwork {
    shared: Arc<Mutex<Shared>>,
    closes: Arc<AtomicUsize>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            network: self.clone(),
        }
    }

    /// How many transports the session has created.
    pub fn connects(&self) -> usize {
        self.shared.lock().unwrap().links.len()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.shared.lock().unwrap().endpoints.clone()
    }

    /// How many times the session asked a transport to close.
    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn with_latest<F: FnOnce(&MockLink)>(&self, f: F) {
        let shared = self.shared.lock().unwrap();
        let link = shared.links.last().expect("no connection attempt yet");
        f(link);
    }

    /// Complete the most recent connection attempt.
    pub fn accept(&self) {
        self.with_latest(|link| {
            link.open.store(true, Ordering::SeqCst);
            let _ = link.events.send(TransportEvent::Open);
        });
    }

    /// Fail the most recent connection attempt.
    pub fn refuse(&self) {
        self.with_latest(|link| {
            let _ = link.events.send(TransportEvent::Error("connection refused".into()));
            let _ = link.events.send(TransportEvent::Close {
                code: None,
                reason: Some("connect failed".into()),
            });
        });
    }

    /// Close the current connection from the server side.
    pub fn drop_connection(&self) {
        self.with_latest(|link| {
            link.open.store(false, Ordering::SeqCst);
            let _ = link.events.send(TransportEvent::Close {
                code: Some(1006),
                reason: Some("abnormal closure".into()),
            });
        });
    }

    /// Push a raw text frame to the session.
    pub fn deliver(&self, text: &str) {
        self.with_latest(|link| {
            let _ = link.events.send(TransportEvent::Message(text.to_string()));
        });
    }

    /// Push an `[event, payload]` frame to the session.
    pub fn deliver_event(&self, event: &str, payload: Value) {
        let text = serde_json::to_string(&(event, payload)).unwrap();
        self.deliver(&text);
    }

    /// Every frame the session wrote, in order.
    pub fn sent(&self) -> Vec<String> {
        self.shared.lock().unwrap().sent.clone()
    }

    /// Sent application frames decoded as `(event, payload)`.
    pub fn sent_events(&self) -> Vec<(String, Value)> {
        self.sent()
            .iter()
            .filter_map(|text| serde_json::from_str::<(String, Value)>(text).ok())
            .collect()
    }

    /// Names of sent application frames, in order.
    pub fn sent_names(&self) -> Vec<String> {
        self.sent_events().into_iter().map(|(name, _)| name).collect()
    }

    /// How many times the given raw frame was written.
    pub fn count_sent(&self, frame: &str) -> usize {
        self.sent().iter().filter(|text| text.as_str() == frame).count()
    }
}

pub struct MockConnector {
    network: MockNetwork,
}

impl Connector for MockConnector {
    fn connect(&mut self, endpoint: &str, events: TransportEventSender) -> Box<dyn Transport> {
        let open = Arc::new(AtomicBool::new(false));
        let mut shared = self.network.shared.lock().unwrap();
        shared.endpoints.push(endpoint.to_string());
        shared.links.push(MockLink {
            events,
            open: open.clone(),
        });
        Box::new(MockTransport {
            open,
            shared: self.network.shared.clone(),
            closes: self.network.closes.clone(),
        })
    }
}

struct MockTransport {
    open: Arc<AtomicBool>,
    shared: Arc<Mutex<Shared>>,
    closes: Arc<AtomicUsize>,
}

impl Transport for MockTransport {
    fn send(&mut self, text: String) -> TetherResult<()> {
        if !self.is_open() {
            return Err(TetherError::Transport("mock link is not open".into()));
        }
        self.shared.lock().unwrap().sent.push(text);
        Ok(())
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Let the driver task process everything already queued for it.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Move paused time forward and let the driver react.
pub async fn advance(d: Duration) {
    tokio::time::advance(d).await;
    settle().await;
}

pub fn options() -> SessionOptions {
    SessionOptions::new(ENDPOINT).with_debug(true)
}

/// Session handle plus everything a test needs to script it.
pub struct Harness {
    pub session: Session,
    pub network: MockNetwork,
    pub feed: ConnectivityFeed,
    pub events: broadcast::Receiver<SessionEvent>,
}

/// Spawn a session against a fresh mock network without connecting.
pub fn spawn(options: SessionOptions) -> Harness {
    let network = MockNetwork::new();
    let (feed, signal) = ConnectivitySignal::manual(true);
    let session = Session::spawn(options, network.connector(), signal).expect("valid options");
    let events = session.subscribe();
    Harness {
        session,
        network,
        feed,
        events,
    }
}

/// Spawn, connect and accept the connection.
pub async fn connected(options: SessionOptions) -> Harness {
    let harness = spawn(options);
    harness.session.connect().expect("connect");
    settle().await;
    harness.network.accept();
    settle().await;
    harness
}

/// Everything broadcast so far, without waiting.
pub fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => out.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return out,
        }
    }
}

/// The errors carried by `Fault` events, with their fatality.
pub fn faults(events: &[SessionEvent]) -> Vec<(bool, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Fault { fatal, error } => Some((*fatal, error.to_string())),
            _ => None,
        })
        .collect()
}

pub fn destroyed_reasons(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Destroyed { reason } => Some(reason.clone()),
            _ => None,
        })
        .collect()
}

/// Shared sink a callback can record into.
pub fn recorder<T: Send + 'static>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Background task that keeps the current link busy with inbound frames.
/// Stops when dropped.
pub struct Flood {
    task: JoinHandle<()>,
}

impl Drop for Flood {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Deliver `event` frames without pause until the returned guard is dropped.
pub fn flood(network: &MockNetwork, event: &str) -> Flood {
    let network = network.clone();
    let event = event.to_string();
    let task = tokio::spawn(async move {
        loop {
            for n in 0..64 {
                network.deliver_event(&event, json!(n));
            }
            tokio::task::yield_now().await;
        }
    });
    Flood { task }
}
