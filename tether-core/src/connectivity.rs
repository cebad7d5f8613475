//! Environment connectivity signal.
//!
//! Sessions never look up network state globally; they are handed a
//! [`ConnectivitySignal`] which answers "is the network up right now" and
//! wakes on online/offline transitions. The probe crate feeds one, tests
//! and embedders can feed one by hand.

use std::sync::Arc;

use tokio::sync::watch;

/// Level-triggered online/offline signal backed by a `watch` channel.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    rx: watch::Receiver<bool>,
    /// Level last reported by `changed()`.
    last: bool,
    /// Keeps a private sender alive so `changed()` never errors out.
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

/// Manual feed for a [`ConnectivitySignal`].
#[derive(Debug, Clone)]
pub struct ConnectivityFeed {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
    /// Wrap the receiving side of an existing watch channel.
    pub fn from_receiver(rx: watch::Receiver<bool>) -> Self {
        let last = *rx.borrow();
        Self {
            rx,
            last,
            _keepalive: None,
        }
    }

    /// A signal that reports online forever.
    pub fn always_online() -> Self {
        let (tx, rx) = watch::channel(true);
        Self {
            rx,
            last: true,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    /// A signal driven by hand through the returned feed.
    pub fn manual(initially_online: bool) -> (ConnectivityFeed, Self) {
        let (tx, rx) = watch::channel(initially_online);
        let tx = Arc::new(tx);
        let signal = Self {
            rx,
            last: initially_online,
            _keepalive: Some(tx.clone()),
        };
        (ConnectivityFeed { tx }, signal)
    }

    /// Synchronous "is currently online" query.
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next transition and return the new level.
    ///
    /// A transition that happened while nobody was waiting is reported on the
    /// next call. Writes that leave the level unchanged are skipped. If every
    /// sender is gone the signal is frozen and this never resolves.
    pub async fn changed(&mut self) -> bool {
        loop {
            let now = *self.rx.borrow_and_update();
            if now != self.last {
                self.last = now;
                return now;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl ConnectivityFeed {
    pub fn set_online(&self, online: bool) {
        self.tx.send_replace(online);
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }
}
