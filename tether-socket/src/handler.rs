//! Handler configuration: what a registered event does on arrival.
//!
//! A handler is either a bare callback or a descriptor combining an optional
//! per-message callback, an ack policy and a batching (cycle) policy.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use tether_core::constants::ACK_SUFFIX;
use tether_core::error::{TetherError, TetherResult};

/// Per-message callback.
pub type EventCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Batch callback fired by a cycle policy.
pub type BatchCallback = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Dispatch configuration for one event name.
#[derive(Clone)]
pub enum HandlerConfig {
    Callback(EventCallback),
    Descriptor(HandlerDescriptor),
}

impl HandlerConfig {
    /// Shorthand for a bare callback handler.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }

    /// Whether dispatch has anything to do for this handler.
    pub fn is_configured(&self) -> bool {
        match self {
            Self::Callback(_) => true,
            Self::Descriptor(d) => d.callback.is_some() || d.ack.is_some() || d.cycle.is_some(),
        }
    }

    pub fn event_callback(&self) -> Option<&EventCallback> {
        match self {
            Self::Callback(cb) => Some(cb),
            Self::Descriptor(d) => d.callback.as_ref(),
        }
    }

    pub fn ack(&self) -> Option<&AckPolicy> {
        match self {
            Self::Callback(_) => None,
            Self::Descriptor(d) => d.ack.as_ref(),
        }
    }

    pub fn cycle(&self) -> Option<&CyclePolicy> {
        match self {
            Self::Callback(_) => None,
            Self::Descriptor(d) => d.cycle.as_ref(),
        }
    }
}

impl From<HandlerDescriptor> for HandlerConfig {
    fn from(descriptor: HandlerDescriptor) -> Self {
        Self::Descriptor(descriptor)
    }
}

impl fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::Descriptor(d) => f.debug_tuple("Descriptor").field(d).finish(),
        }
    }
}

/// Structured handler built field by field.
#[derive(Clone, Default)]
pub struct HandlerDescriptor {
    callback: Option<EventCallback>,
    ack: Option<AckPolicy>,
    cycle: Option<CyclePolicy>,
}

impl HandlerDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(f));
        self
    }

    pub fn ack(mut self, policy: AckPolicy) -> Self {
        self.ack = Some(policy);
        self
    }

    pub fn cycle(mut self, policy: CyclePolicy) -> Self {
        self.cycle = Some(policy);
        self
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("callback", &self.callback.is_some())
            .field("ack", &self.ack)
            .field("cycle", &self.cycle)
            .finish()
    }
}

/// Acknowledge receipt of an event back to the peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckPolicy {
    /// Ack event name; defaults to `<event>-ack`.
    pub event_override: Option<String>,
    /// Merge the inbound payload into the ack body.
    pub include_payload: bool,
}

impl AckPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, name: impl Into<String>) -> Self {
        self.event_override = Some(name.into());
        self
    }

    pub fn including_payload(mut self) -> Self {
        self.include_payload = true;
        self
    }

    /// Name of the ack event sent for `event`.
    pub fn event_name(&self, event: &str) -> String {
        match &self.event_override {
            Some(name) => name.clone(),
            None => format!("{event}{ACK_SUFFIX}"),
        }
    }

    /// Ack body: `{ when, id? }`, optionally merged with the inbound payload.
    ///
    /// Object payloads are merged key by key; any other non-null payload is
    /// carried under `payload`. `when` and `id` always win over merged keys.
    pub fn body(&self, payload: &Value, when: DateTime<Utc>, session_id: Option<&str>) -> Value {
        let mut body = Map::new();
        if self.include_payload {
            match payload {
                Value::Object(fields) => body.extend(fields.clone()),
                Value::Null => {}
                other => {
                    body.insert("payload".into(), other.clone());
                }
            }
        }
        body.insert("when".into(), json!(when.timestamp_millis()));
        match session_id {
            Some(id) => {
                body.insert("id".into(), json!(id));
            }
            None => {
                body.remove("id");
            }
        }
        Value::Object(body)
    }
}

/// Batch every `every` payloads into one callback.
#[derive(Clone)]
pub struct CyclePolicy {
    every: NonZeroUsize,
    exclusive: bool,
    callback: BatchCallback,
}

impl CyclePolicy {
    /// Batch policy firing `f` with each run of `every` payloads.
    ///
    /// `every` must be at least 1.
    pub fn every<F>(every: usize, f: F) -> TetherResult<Self>
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        let every = NonZeroUsize::new(every)
            .ok_or_else(|| TetherError::Config("cycle threshold must be a positive integer".into()))?;
        Ok(Self {
            every,
            exclusive: false,
            callback: Arc::new(f),
        })
    }

    /// Deliver only batches; skip the per-message callback.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn threshold(&self) -> NonZeroUsize {
        self.every
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn batch_callback(&self) -> &BatchCallback {
        &self.callback
    }
}

impl fmt::Debug for CyclePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CyclePolicy")
            .field("every", &self.every)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_configured_forms() {
        assert!(HandlerConfig::callback(|_| {}).is_configured());
        assert!(!HandlerConfig::from(HandlerDescriptor::new()).is_configured());
        assert!(HandlerConfig::from(HandlerDescriptor::new().ack(AckPolicy::new())).is_configured());
        let cycle = CyclePolicy::every(2, |_| {}).unwrap();
        assert!(HandlerConfig::from(HandlerDescriptor::new().cycle(cycle)).is_configured());
    }

    #[test]
    fn test_zero_cycle_rejected() {
        let err = CyclePolicy::every(0, |_| {}).err().unwrap();
        assert!(matches!(err, TetherError::Config(_)));
    }

    #[test]
    fn test_ack_event_name() {
        assert_eq!(AckPolicy::new().event_name("foo"), "foo-ack");
        assert_eq!(AckPolicy::new().with_event("got-it").event_name("foo"), "got-it");
    }

    #[test]
    fn test_ack_body_without_session() {
        let body = AckPolicy::new().body(&json!({"x": 1}), at(42), None);
        assert_eq!(body, json!({"when": 42}));
    }

    #[test]
    fn test_ack_body_merges_object_payload() {
        let policy = AckPolicy::new().including_payload();
        let body = policy.body(&json!({"x": 1, "when": "spoofed", "id": "spoofed"}), at(42), Some("abc"));
        assert_eq!(body, json!({"x": 1, "when": 42, "id": "abc"}));

        let body = policy.body(&json!({"id": "spoofed"}), at(42), None);
        assert_eq!(body, json!({"when": 42}));
    }

    #[test]
    fn test_ack_body_wraps_scalar_payload() {
        let policy = AckPolicy::new().including_payload();
        let body = policy.body(&json!([1, 2]), at(7), Some("abc"));
        assert_eq!(body, json!({"payload": [1, 2], "when": 7, "id": "abc"}));
    }
}
