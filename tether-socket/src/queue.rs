//! Offline delivery queue.
//!
//! Outbound events are held here while the network is down and replayed,
//! oldest first, once a connection is open again. Replay either drains the
//! whole queue at once or releases one event per pacing interval.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

/// An outbound event waiting for a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub event: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct OfflineQueue {
    items: VecDeque<QueuedMessage>,
    pacing: Option<Duration>,
    next_release: Option<Instant>,
}

impl OfflineQueue {
    pub fn new(pacing: Option<Duration>) -> Self {
        Self {
            items: VecDeque::new(),
            pacing,
            next_release: None,
        }
    }

    pub fn push(&mut self, message: QueuedMessage) {
        debug!("queued '{}' for later delivery ({} waiting)", message.event, self.items.len() + 1);
        self.items.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether a paced replay is in progress.
    pub fn is_replaying(&self) -> bool {
        self.next_release.is_some()
    }

    /// When the next paced release is due.
    pub fn next_release(&self) -> Option<Instant> {
        self.next_release
    }

    /// Start replaying after a connection opened.
    ///
    /// Without pacing every queued message is returned immediately in
    /// enqueue order. With pacing nothing is returned now; the first message
    /// becomes due one interval from `now`.
    pub fn begin_replay(&mut self, now: Instant) -> Vec<QueuedMessage> {
        if self.items.is_empty() {
            return Vec::new();
        }
        match self.pacing {
            None => {
                info!("replaying {} queued event(s)", self.items.len());
                self.items.drain(..).collect()
            }
            Some(every) => {
                info!("replaying {} queued event(s), one every {every:?}", self.items.len());
                self.next_release = Some(now + every);
                Vec::new()
            }
        }
    }

    /// Release the oldest message for a due pacing tick and schedule the next.
    pub fn release_due(&mut self, now: Instant) -> Option<QueuedMessage> {
        self.next_release = None;
        let message = self.items.pop_front()?;
        if let (false, Some(every)) = (self.items.is_empty(), self.pacing) {
            self.next_release = Some(now + every);
        }
        Some(message)
    }

    /// Stop a paced replay; queued messages stay for the next connection.
    pub fn pause(&mut self) {
        self.next_release = None;
    }

    /// Drop everything. Returns how many messages were discarded.
    pub fn clear(&mut self) -> usize {
        self.next_release = None;
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(n: u64) -> QueuedMessage {
        QueuedMessage {
            event: format!("m{n}"),
            payload: json!(n),
            enqueued_at: Utc::now(),
        }
    }

    fn names(messages: &[QueuedMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.event.as_str()).collect()
    }

    #[test]
    fn test_unpaced_replay_is_fifo() {
        let mut queue = OfflineQueue::new(None);
        for n in 1..=3 {
            queue.push(message(n));
        }
        let replayed = queue.begin_replay(Instant::now());
        assert_eq!(names(&replayed), vec!["m1", "m2", "m3"]);
        assert!(queue.is_empty());
        assert!(!queue.is_replaying());
    }

    #[test]
    fn test_paced_replay_is_fifo() {
        let pacing = Duration::from_millis(100);
        let mut queue = OfflineQueue::new(Some(pacing));
        for n in 1..=3 {
            queue.push(message(n));
        }
        let now = Instant::now();
        assert!(queue.begin_replay(now).is_empty());
        assert_eq!(queue.next_release(), Some(now + pacing));

        let mut released = Vec::new();
        let mut tick = now;
        while let Some(due) = queue.next_release() {
            tick = due;
            released.extend(queue.release_due(tick));
        }
        assert_eq!(names(&released), vec!["m1", "m2", "m3"]);
        assert_eq!(tick, now + pacing * 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pause_keeps_messages() {
        let mut queue = OfflineQueue::new(Some(Duration::from_millis(10)));
        queue.push(message(1));
        queue.push(message(2));
        let now = Instant::now();
        queue.begin_replay(now);
        queue.release_due(now);
        queue.pause();
        assert!(!queue.is_replaying());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.clear(), 1);
    }

    #[test]
    fn test_empty_replay_is_noop() {
        let mut queue = OfflineQueue::new(Some(Duration::from_millis(10)));
        assert!(queue.begin_replay(Instant::now()).is_empty());
        assert!(!queue.is_replaying());
    }
}
