//! Network monitor: periodic checks, transitions and latency.
//!
//! The monitor starts out assuming the network is online. Every interval it
//! runs one [`ReachabilityCheck`]; `Online`/`Offline` are broadcast only on
//! transitions, `Quality` after every successful check.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use tether_core::config::ProbeConfig;
use tether_core::connectivity::ConnectivitySignal;
use tether_core::error::TetherResult;

use crate::check::{HttpCheck, ReachabilityCheck};

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Online,
    Offline,
    Quality { latency: Duration },
}

/// Online/offline state machine fed by check outcomes.
#[derive(Debug, Clone)]
pub struct LinkTracker {
    online: bool,
    latency: Option<Duration>,
}

impl Default for LinkTracker {
    fn default() -> Self {
        Self {
            online: true,
            latency: None,
        }
    }
}

impl LinkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Latency of the last successful check.
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Fold one check outcome in and return the events it produces.
    pub fn observe(&mut self, outcome: &TetherResult<Duration>) -> Vec<NetworkEvent> {
        let mut events = Vec::new();
        match outcome {
            Ok(latency) => {
                if !self.online {
                    self.online = true;
                    events.push(NetworkEvent::Online);
                }
                self.latency = Some(*latency);
                events.push(NetworkEvent::Quality { latency: *latency });
            }
            Err(_) => {
                if self.online {
                    self.online = false;
                    events.push(NetworkEvent::Offline);
                }
            }
        }
        events
    }
}

struct Inner {
    check: Box<dyn ReachabilityCheck>,
    tracker: Mutex<LinkTracker>,
    events: broadcast::Sender<NetworkEvent>,
    online: watch::Sender<bool>,
}

impl Inner {
    async fn run_check(&self) -> Vec<NetworkEvent> {
        let outcome = self.check.check().await;
        if let Err(e) = &outcome {
            debug!("reachability check failed: {e}");
        }

        let (events, online) = match self.tracker.lock() {
            Ok(mut tracker) => (tracker.observe(&outcome), tracker.is_online()),
            Err(poisoned) => {
                let mut tracker = poisoned.into_inner();
                (tracker.observe(&outcome), tracker.is_online())
            }
        };

        for event in &events {
            match event {
                NetworkEvent::Online => info!("network online"),
                NetworkEvent::Offline => warn!("network offline"),
                NetworkEvent::Quality { latency } => debug!("network latency {latency:?}"),
            }
            let _ = self.events.send(event.clone());
        }
        self.online.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        events
    }

    fn tracker(&self) -> LinkTracker {
        match self.tracker.lock() {
            Ok(tracker) => tracker.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Polling connectivity monitor.
///
/// Dropping the monitor stops polling; signals handed out earlier keep
/// their last level.
pub struct NetworkMonitor {
    inner: Arc<Inner>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMonitor {
    pub fn new(check: impl ReachabilityCheck, interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (online, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                check: Box::new(check),
                tracker: Mutex::new(LinkTracker::new()),
                events,
                online,
            }),
            interval,
            task: Mutex::new(None),
        }
    }

    /// HTTP monitor built from the `[probe]` config section.
    pub fn from_config(config: &ProbeConfig) -> TetherResult<Self> {
        let check = HttpCheck::new(config.url.clone(), config.timeout())?;
        Ok(Self::new(check, config.interval()))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.inner.tracker().is_online()
    }

    pub fn latency(&self) -> Option<Duration> {
        self.inner.tracker().latency()
    }

    /// A connectivity signal that follows this monitor.
    pub fn signal(&self) -> ConnectivitySignal {
        ConnectivitySignal::from_receiver(self.inner.online.subscribe())
    }

    /// Run one check right away.
    pub async fn check_now(&self) -> Vec<NetworkEvent> {
        self.inner.run_check().await
    }

    /// Start polling. The first check runs one interval from now.
    pub fn start(&self) {
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("network monitor already running");
            return;
        }

        let inner = self.inner.clone();
        let every = self.interval;
        info!("network monitor started (every {every:?})");
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.run_check().await;
            }
        }));
    }

    pub fn stop(&self) {
        let handle = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
            info!("network monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        match self.task.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|h| !h.is_finished()),
            Err(_) => false,
        }
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
