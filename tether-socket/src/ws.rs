//! WebSocket transport built on tokio-tungstenite.
//!
//! Each connection runs in its own task: it performs the handshake, then
//! forwards inbound text frames as [`TransportEvent::Message`] and writes
//! whatever the session queues. Protocol-level ping frames are answered by
//! tungstenite itself; only text frames reach the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use tether_core::error::{TetherError, TetherResult};

use crate::transport::{Connector, Transport, TransportEvent, TransportEventSender};

/// Normal closure code sent when we close the socket ourselves.
const NORMAL_CLOSURE: u16 = 1000;

enum Outbound {
    Text(String),
    Close,
}

/// Connector opening real WebSocket connections.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for WsConnector {
    fn connect(&mut self, endpoint: &str, events: TransportEventSender) -> Box<dyn Transport> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        tokio::spawn(run_connection(
            endpoint.to_string(),
            self.connect_timeout,
            outbound_rx,
            events,
            open.clone(),
        ));
        Box::new(WsTransport { outbound_tx, open })
    }
}

/// Handle to one WebSocket connection task.
///
/// Dropping the handle closes the socket once queued frames are written.
struct WsTransport {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl Transport for WsTransport {
    fn send(&mut self, text: String) -> TetherResult<()> {
        if !self.is_open() {
            return Err(TetherError::Transport("socket is not open".into()));
        }
        self.outbound_tx
            .send(Outbound::Text(text))
            .map_err(|_| TetherError::Transport("socket task has exited".into()))
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.outbound_tx.send(Outbound::Close);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

fn closed(code: Option<u16>, reason: impl Into<String>) -> TransportEvent {
    TransportEvent::Close {
        code,
        reason: Some(reason.into()),
    }
}

async fn run_connection(
    endpoint: String,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: TransportEventSender,
    open: Arc<AtomicBool>,
) {
    debug!("websocket connecting to {endpoint}");
    let stream = match tokio::time::timeout(connect_timeout, connect_async(endpoint.as_str())).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            warn!("websocket connect to {endpoint} failed: {e}");
            let _ = events.send(TransportEvent::Error(e.to_string()));
            let _ = events.send(closed(None, "connect failed"));
            return;
        }
        Err(_) => {
            warn!("websocket connect to {endpoint} timed out after {connect_timeout:?}");
            let _ = events.send(TransportEvent::Error(format!(
                "connect timed out after {connect_timeout:?}"
            )));
            let _ = events.send(closed(None, "connect timed out"));
            return;
        }
    };

    info!("websocket open: {endpoint}");
    open.store(true, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Open);

    let (mut writer, mut reader) = stream.split();
    loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = writer.send(Message::Text(text.into())).await {
                        warn!("websocket write failed: {e}");
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        let _ = events.send(closed(None, "write failed"));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    debug!("websocket closing: {endpoint}");
                    let _ = writer.send(Message::Close(None)).await;
                    let _ = events.send(closed(Some(NORMAL_CLOSURE), "closed by client"));
                    break;
                }
            },
            inbound = reader.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(text.to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(f.code.into()), f.reason.to_string()),
                        None => (None, "server closed connection".to_string()),
                    };
                    info!("websocket closed by peer (code {code:?}): {reason}");
                    let _ = events.send(closed(code, reason));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("websocket read error: {e}");
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    let _ = events.send(closed(None, "read failed"));
                    break;
                }
                None => {
                    let _ = events.send(closed(None, "stream ended"));
                    break;
                }
            }
        }
    }

    open.store(false, Ordering::SeqCst);
    debug!("websocket task finished: {endpoint}");
}
