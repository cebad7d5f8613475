//! Session controller.
//!
//! A session is split in two: a cheap, cloneable [`Session`] handle and a
//! driver task that owns every piece of mutable state (transport, handler
//! registry, heartbeat, backoff, offline queue). The handle talks to the
//! driver over an unbounded command channel, so a handler callback that
//! calls back into the session (even `destroy`) never re-enters the driver
//! while it is mid-dispatch.
//!
//! The driver waits on exactly one thing at a time: the next command, the
//! next transport event, a connectivity transition, or one of the timers
//! (heartbeat ping, heartbeat deadline, reconnect backoff, replay pacing).
//! Timers are plain deadlines; clearing a deadline cancels its timer.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tether_core::connectivity::ConnectivitySignal;
use tether_core::constants::{MOUNTED_EVENT, SESSION_EVENT_CAPACITY};
use tether_core::error::{TetherError, TetherResult};

use crate::backoff::Backoff;
use crate::codec::{envelope, Frame, WireCodec};
use crate::events::{SessionEvent, SessionEvents, SessionState};
use crate::handler::HandlerConfig;
use crate::heartbeat::HeartbeatMonitor;
use crate::options::SessionOptions;
use crate::queue::{OfflineQueue, QueuedMessage};
use crate::registry::{Dispatch, DispatchContext, HandlerInfo, HandlerRegistry};
use crate::transport::{Connector, Transport, TransportEvent};

/// Point-in-time view of a session, for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub mount_time: Option<DateTime<Utc>>,
    /// Reconnect attempts since the last successful open.
    pub attempt: u32,
    /// Outbound events waiting in the offline queue.
    pub queued: usize,
    pub handlers: Vec<HandlerInfo>,
}

enum Command {
    Connect,
    Send(QueuedMessage),
    Register { event: String, config: HandlerConfig },
    Unregister(String),
    SetDisabled { event: String, disabled: bool },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Destroy(String),
}

/// Handle to a running session.
///
/// Cloning is cheap; all clones drive the same session. The session is
/// destroyed when `destroy` is called, when a fatal condition occurs, or
/// when the last handle is dropped.
///
/// Handler callbacks live inside the session, so a `Session` captured by
/// one keeps the session alive forever. Capture a [`WeakSession`] from
/// [`Session::downgrade`] there instead.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SessionState>,
    events: SessionEvents,
    destroyed: Arc<AtomicBool>,
}

impl Session {
    /// Start a session driver without connecting yet.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<C: Connector>(
        options: SessionOptions,
        connector: C,
        connectivity: ConnectivitySignal,
    ) -> TetherResult<Self> {
        options.validate()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let events = SessionEvents::new(SESSION_EVENT_CAPACITY);
        let destroyed = Arc::new(AtomicBool::new(false));

        let driver = Driver::new(
            options,
            connector,
            connectivity,
            command_rx,
            state_tx,
            events.clone(),
            destroyed.clone(),
        );
        tokio::spawn(driver.run());

        Ok(Self {
            commands,
            state_rx,
            events,
            destroyed,
        })
    }

    /// Start a session and connect right away.
    pub fn open<C: Connector>(
        options: SessionOptions,
        connector: C,
        connectivity: ConnectivitySignal,
    ) -> TetherResult<Self> {
        let session = Self::spawn(options, connector, connectivity)?;
        session.connect()?;
        Ok(session)
    }

    fn command(&self, command: Command) -> TetherResult<()> {
        if self.is_destroyed() {
            return Err(TetherError::SessionDestroyed);
        }
        self.commands
            .send(command)
            .map_err(|_| TetherError::SessionDestroyed)
    }

    /// Open a transport. Ignored while already connecting or connected;
    /// refused (staying disconnected) while the network is offline.
    pub fn connect(&self) -> TetherResult<()> {
        self.command(Command::Connect)
    }

    /// Send an application event.
    ///
    /// The payload is wrapped as `{when, id?, payload}` with `when` taken
    /// now. While offline (and with the fallback enabled) it is queued and
    /// replayed in order once a connection is open again.
    pub fn send(&self, event: impl Into<String>, payload: Value) -> TetherResult<()> {
        self.command(Command::Send(QueuedMessage {
            event: event.into(),
            payload,
            enqueued_at: Utc::now(),
        }))
    }

    /// Register (or replace) the handler for `event`.
    pub fn on(&self, event: impl Into<String>, config: impl Into<HandlerConfig>) -> TetherResult<()> {
        self.command(Command::Register {
            event: event.into(),
            config: config.into(),
        })
    }

    /// Alias of [`Session::on`].
    pub fn register(&self, event: impl Into<String>, config: impl Into<HandlerConfig>) -> TetherResult<()> {
        self.on(event, config)
    }

    /// Remove the handler for `event` entirely.
    pub fn off(&self, event: impl Into<String>) -> TetherResult<()> {
        self.command(Command::Unregister(event.into()))
    }

    /// Alias of [`Session::off`].
    pub fn unregister(&self, event: impl Into<String>) -> TetherResult<()> {
        self.off(event)
    }

    /// Keep the handler for `event` registered but skip it on dispatch.
    pub fn disable(&self, event: impl Into<String>) -> TetherResult<()> {
        self.command(Command::SetDisabled {
            event: event.into(),
            disabled: true,
        })
    }

    pub fn enable(&self, event: impl Into<String>) -> TetherResult<()> {
        self.command(Command::SetDisabled {
            event: event.into(),
            disabled: false,
        })
    }

    /// Tear the session down for good.
    ///
    /// Safe to call from any callback and any number of times; only the
    /// first call has an effect. Every later call to a command method
    /// returns [`TetherError::SessionDestroyed`].
    pub fn destroy(&self, reason: impl Into<String>) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            debug!("destroy requested on an already destroyed session");
            return;
        }
        // The driver may already be gone after a fatal error.
        let _ = self.commands.send(Command::Destroy(reason.into()));
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// A handle that does not keep the session alive.
    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            commands: self.commands.downgrade(),
            state_rx: self.state_rx.clone(),
            events: self.events.clone(),
            destroyed: self.destroyed.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> TetherResult<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Snapshot(tx))?;
        rx.await.map_err(|_| TetherError::SessionDestroyed)
    }

    /// Resolve once the session has reached `Destroyed`.
    pub async fn closed(&self) {
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|state| state.is_terminal()).await;
    }
}

/// Non-owning session handle, for use inside handler callbacks.
#[derive(Clone)]
pub struct WeakSession {
    commands: mpsc::WeakUnboundedSender<Command>,
    state_rx: watch::Receiver<SessionState>,
    events: SessionEvents,
    destroyed: Arc<AtomicBool>,
}

impl WeakSession {
    /// The session, unless every strong handle is already gone.
    pub fn upgrade(&self) -> Option<Session> {
        let commands = self.commands.upgrade()?;
        Some(Session {
            commands,
            state_rx: self.state_rx.clone(),
            events: self.events.clone(),
            destroyed: self.destroyed.clone(),
        })
    }

    /// Destroy the session if it is still alive.
    pub fn destroy(&self, reason: impl Into<String>) {
        if let Some(session) = self.upgrade() {
            session.destroy(reason);
        }
    }
}

/// Current transport plus the receiving end of its event channel.
struct Link {
    transport: Box<dyn Transport>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

struct Driver<C> {
    options: SessionOptions,
    connector: C,
    connectivity: ConnectivitySignal,
    codec: WireCodec,
    registry: HandlerRegistry,
    heartbeat: HeartbeatMonitor,
    backoff: Backoff,
    queue: OfflineQueue,
    commands: mpsc::UnboundedReceiver<Command>,
    link: Option<Link>,
    reconnect_at: Option<Instant>,
    /// Set once `connect` was requested; an `online` transition only
    /// reconnects sessions that wanted a connection.
    wants_connection: bool,
    session_id: Option<String>,
    mount_time: Option<DateTime<Utc>>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    events: SessionEvents,
    destroyed: Arc<AtomicBool>,
}

impl<C: Connector> Driver<C> {
    fn new(
        options: SessionOptions,
        connector: C,
        connectivity: ConnectivitySignal,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<SessionState>,
        events: SessionEvents,
        destroyed: Arc<AtomicBool>,
    ) -> Self {
        let hb = &options.heartbeat;
        let codec = WireCodec::new(hb.ping.clone(), hb.pong.clone());
        let heartbeat = HeartbeatMonitor::new(hb.enabled, hb.interval, hb.timeout);
        let backoff = Backoff::new(options.max_retries, options.retry_delay);
        let queue = OfflineQueue::new(options.fallback_pacing);

        Self {
            options,
            connector,
            connectivity,
            codec,
            registry: HandlerRegistry::new(),
            heartbeat,
            backoff,
            queue,
            commands,
            link: None,
            reconnect_at: None,
            wants_connection: false,
            session_id: None,
            mount_time: None,
            state: SessionState::Disconnected,
            state_tx,
            events,
            destroyed,
        }
    }

    async fn run(mut self) {
        debug!("session driver started for {}", self.options.endpoint);

        while !self.state.is_terminal() {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => self.destroy("all session handles dropped".into()),
                },
                // Due timers go before inbound traffic so a busy link
                // cannot starve them.
                _ = sleep_until_opt(self.heartbeat.deadline()) => self.heartbeat_timed_out(),
                _ = sleep_until_opt(self.heartbeat.next_ping()) => self.send_ping(),
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.open_transport();
                }
                _ = sleep_until_opt(self.queue.next_release()) => self.release_queued(),
                online = self.connectivity.changed() => self.handle_connectivity(online),
                event = next_transport_event(&mut self.link) => self.handle_transport_event(event),
            }
        }

        debug!("session driver stopped for {}", self.options.endpoint);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                self.wants_connection = true;
                self.open_transport();
            }
            Command::Send(message) => self.handle_send(message),
            Command::Register { event, config } => {
                if self.registry.register(event.clone(), config) {
                    info!("replaced handler for '{event}'");
                } else {
                    debug!("registered handler for '{event}'");
                }
            }
            Command::Unregister(event) => {
                if !self.registry.unregister(&event) {
                    debug!("unregister: no handler for '{event}'");
                }
            }
            Command::SetDisabled { event, disabled } => {
                let found = if disabled {
                    self.registry.disable(&event)
                } else {
                    self.registry.enable(&event)
                };
                if !found {
                    warn!("cannot toggle '{event}': no handler registered");
                }
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Destroy(reason) => self.destroy(reason),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            session_id: self.session_id.clone(),
            mount_time: self.mount_time,
            attempt: self.backoff.attempt(),
            queued: self.queue.len(),
            handlers: self.registry.infos(),
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        info!("session state: {} -> {}", self.state, next);
        self.state = next;
        self.state_tx.send_replace(next);
        self.events.emit(SessionEvent::StateChanged(next));
    }

    fn fault(&self, error: TetherError) {
        self.events.emit(SessionEvent::fault(error));
    }

    // -- connection lifecycle --

    fn open_transport(&mut self) {
        match self.state {
            SessionState::Destroyed => return,
            SessionState::Connecting | SessionState::Connected => {
                debug!("already connected or connecting, skipping");
                return;
            }
            SessionState::Disconnected | SessionState::Reconnecting => {}
        }
        self.reconnect_at = None;

        if !self.connectivity.is_online() {
            warn!("network offline, not connecting to {}", self.options.endpoint);
            self.set_state(SessionState::Disconnected);
            return;
        }

        self.set_state(SessionState::Connecting);
        info!(
            "connecting to {} (attempt {}/{})",
            self.options.endpoint,
            self.backoff.attempt(),
            self.backoff.max_attempts()
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = self.connector.connect(&self.options.endpoint, tx);
        self.link = Some(Link {
            transport,
            events: rx,
        });
    }

    /// Drop the current link and cancel every timer tied to it.
    ///
    /// With `close` the transport is asked to close first. Dropping the
    /// event receiver detaches this session from the old transport.
    fn release_link(&mut self, close: bool) {
        self.heartbeat.stop();
        self.queue.pause();
        if let Some(mut link) = self.link.take() {
            if close {
                link.transport.close();
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Close { code, reason } => {
                let reason = reason.unwrap_or_default();
                info!("transport closed (code {code:?}): {reason}");
                self.link_lost(&format!("closed: {reason}"));
            }
            TransportEvent::Error(info) => {
                warn!("transport error: {info}");
                self.fault(TetherError::Transport(info.clone()));
                self.link_lost(&info);
            }
        }
    }

    fn on_open(&mut self) {
        if self.state != SessionState::Connecting {
            debug!("ignoring open while {}", self.state);
            return;
        }
        self.set_state(SessionState::Connected);
        self.backoff.reset();

        let now = Instant::now();
        self.heartbeat.start(now);
        for message in self.queue.begin_replay(now) {
            self.transmit(message);
        }
    }

    fn link_lost(&mut self, cause: &str) {
        self.release_link(false);
        if self.state.is_terminal() {
            return;
        }
        self.schedule_reconnect(cause);
    }

    fn schedule_reconnect(&mut self, cause: &str) {
        match self.backoff.next_delay() {
            Some(delay) => {
                let attempt = self.backoff.attempt();
                warn!(
                    "connection lost ({cause}); reconnect attempt {attempt}/{} in {:.1}s",
                    self.backoff.max_attempts(),
                    delay.as_secs_f64()
                );
                self.set_state(SessionState::Reconnecting);
                self.reconnect_at = Some(Instant::now() + delay);
                self.events.emit(SessionEvent::Reconnecting { attempt, delay });
            }
            None => {
                let err = TetherError::RetriesExhausted(self.backoff.max_attempts());
                error!("{err}");
                let reason = err.to_string();
                self.fault(err);
                self.destroy(reason);
            }
        }
    }

    fn handle_connectivity(&mut self, online: bool) {
        if online {
            info!("network back online");
            let idle = matches!(
                self.state,
                SessionState::Disconnected | SessionState::Reconnecting
            );
            if self.wants_connection && idle {
                self.open_transport();
            }
            return;
        }

        warn!("network offline");
        self.reconnect_at = None;
        if self.link.is_some() {
            self.release_link(true);
        }
        if !self.state.is_terminal() {
            self.set_state(SessionState::Disconnected);
        }
    }

    // -- heartbeat --

    fn send_ping(&mut self) {
        let ping = self.codec.encode_ping();
        if let Err(e) = write_frame(&mut self.link, ping, self.options.debug) {
            debug!("ping not sent: {e}");
        }
        // A ping that failed to go out still arms the deadline.
        self.heartbeat.ping_sent(Instant::now());
    }

    fn heartbeat_timed_out(&mut self) {
        self.heartbeat.deadline_elapsed();
        let err = TetherError::HeartbeatTimeout(self.heartbeat.timeout());
        warn!("{err}, forcing transport closed");
        self.fault(err);
        self.release_link(true);
        self.link_lost("heartbeat timeout");
    }

    // -- inbound --

    fn on_message(&mut self, text: &str) {
        if self.options.debug {
            debug!("<- {text}");
        }
        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping frame: {e}");
                self.fault(e);
                return;
            }
        };
        match frame {
            Frame::Pong => {
                self.heartbeat.pong_received();
            }
            Frame::Ping => {
                let pong = self.codec.encode_pong();
                if let Err(e) = write_frame(&mut self.link, pong, self.options.debug) {
                    debug!("pong not sent: {e}");
                }
            }
            Frame::Event { name, payload } if name == MOUNTED_EVENT => self.on_mounted(payload),
            Frame::Event { name, payload } => self.dispatch(&name, payload),
        }
    }

    fn on_mounted(&mut self, payload: Value) {
        let id = match payload.get("id") {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            // Zero counts as missing, like an empty string.
            Some(Value::Number(n)) if n.as_f64().is_some_and(|v| v != 0.0) => Some(n.to_string()),
            _ => None,
        };
        let Some(id) = id else {
            let err = TetherError::HandshakeFailure("no 'id' in mounted event".into());
            error!("{err}");
            let reason = err.to_string();
            self.fault(err);
            self.destroy(reason);
            return;
        };

        let now = Utc::now();
        info!("session mounted with id {id}");
        self.session_id = Some(id.clone());
        self.mount_time = Some(now);
        self.events.emit(SessionEvent::Mounted { id, at: now });

        if self.registry.contains(MOUNTED_EVENT) {
            self.dispatch(MOUNTED_EVENT, payload);
        }
    }

    fn dispatch(&mut self, event: &str, payload: Value) {
        let ctx = DispatchContext {
            now: Utc::now(),
            session_id: self.session_id.as_deref(),
        };
        let codec = &self.codec;
        let link = &mut self.link;
        let debug_frames = self.options.debug;

        let outcome = self.registry.dispatch(event, payload, ctx, |ack_event, body| {
            let sent = codec
                .encode_event(&ack_event, &body)
                .and_then(|text| write_frame(link, text, debug_frames));
            if let Err(e) = sent {
                warn!("ack '{ack_event}' not sent: {e}");
            }
        });

        match outcome {
            Ok(Dispatch::Unhandled) => {
                if self.options.debug {
                    debug!("no handler for '{event}'");
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!("{e}");
                self.fault(e);
            }
        }
    }

    // -- outbound --

    fn handle_send(&mut self, message: QueuedMessage) {
        let ready = self.state == SessionState::Connected
            && self.connectivity.is_online()
            && self.link.as_ref().is_some_and(|link| link.transport.is_open());

        // Anything already waiting goes first, so new sends queue behind it.
        if self.options.fallback && (!ready || !self.queue.is_empty()) {
            self.queue.push(message);
            return;
        }
        self.transmit(message);
    }

    fn transmit(&mut self, message: QueuedMessage) {
        let body = envelope(message.enqueued_at, self.session_id.as_deref(), message.payload);
        let sent = self
            .codec
            .encode_event(&message.event, &body)
            .and_then(|text| write_frame(&mut self.link, text, self.options.debug));
        if let Err(e) = sent {
            warn!("'{}' not sent: {e}", message.event);
            self.fault(e);
        }
    }

    fn release_queued(&mut self) {
        let open = self.link.as_ref().is_some_and(|link| link.transport.is_open());
        if !open {
            self.queue.pause();
            return;
        }
        if let Some(message) = self.queue.release_due(Instant::now()) {
            self.transmit(message);
        }
    }

    // -- teardown --

    fn destroy(&mut self, reason: String) {
        if self.state.is_terminal() {
            debug!("session already destroyed");
            return;
        }
        info!("destroying session: {reason}");
        self.destroyed.store(true, Ordering::SeqCst);
        self.reconnect_at = None;
        self.release_link(true);

        let dropped = self.queue.clear();
        if dropped > 0 {
            warn!("discarding {dropped} queued event(s)");
        }

        self.set_state(SessionState::Destroyed);
        self.events.emit(SessionEvent::Destroyed { reason });
    }
}

fn write_frame(link: &mut Option<Link>, text: String, debug_frames: bool) -> TetherResult<()> {
    let Some(link) = link.as_mut().filter(|link| link.transport.is_open()) else {
        return Err(TetherError::Transport("not connected".into()));
    };
    if debug_frames {
        debug!("-> {text}");
    }
    link.transport.send(text)
}

/// Next event from the current transport; pending forever without one.
///
/// A transport whose event sender vanished without a `Close` is reported
/// as closed.
async fn next_transport_event(link: &mut Option<Link>) -> TransportEvent {
    match link {
        Some(link) => link.events.recv().await.unwrap_or(TransportEvent::Close {
            code: None,
            reason: Some("transport went away".into()),
        }),
        None => std::future::pending().await,
    }
}

fn sleep_until_opt(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}
