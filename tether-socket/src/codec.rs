//! Wire codec for the `[eventName, payload]` framing.
//!
//! Application frames are JSON arrays carried in text frames. Heartbeat
//! control frames are bare string literals and are recognised before any
//! event decoding happens, whether they arrive raw (`ping`) or JSON-quoted
//! (`"ping"`).

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use tether_core::error::{TetherError, TetherResult};

/// A decoded inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The peer's keep-alive ping literal.
    Ping,
    /// The peer's answer to our ping.
    Pong,
    /// An application event.
    Event { name: String, payload: Value },
}

/// Encoder/decoder bound to a pair of heartbeat literals.
#[derive(Debug, Clone)]
pub struct WireCodec {
    ping: String,
    pong: String,
}

impl WireCodec {
    pub fn new(ping: impl Into<String>, pong: impl Into<String>) -> Self {
        Self {
            ping: ping.into(),
            pong: pong.into(),
        }
    }

    /// Decode one inbound text frame.
    ///
    /// A decoded value that is not an array is treated as `[value, null]`,
    /// so a bare JSON string names an event with no payload.
    pub fn decode(&self, text: &str) -> TetherResult<Frame> {
        if let Some(control) = self.control(text) {
            return Ok(control);
        }

        let value: Value = serde_json::from_str(text)
            .map_err(|e| TetherError::MalformedFrame(format!("not a JSON frame ({e})")))?;

        if let Value::String(literal) = &value {
            if let Some(control) = self.control(literal) {
                return Ok(control);
            }
        }

        let (head, payload) = match value {
            Value::Array(items) => {
                let mut items = items.into_iter();
                let head = items
                    .next()
                    .ok_or_else(|| TetherError::MalformedFrame("empty frame".into()))?;
                (head, items.next().unwrap_or(Value::Null))
            }
            single => (single, Value::Null),
        };

        match head {
            Value::String(name) => Ok(Frame::Event { name, payload }),
            other => Err(TetherError::MalformedFrame(format!(
                "event name must be a string, got {other}"
            ))),
        }
    }

    /// Encode an outbound event as `[name, payload]`.
    pub fn encode_event(&self, name: &str, payload: &Value) -> TetherResult<String> {
        Ok(serde_json::to_string(&(name, payload))?)
    }

    /// The ping literal as a JSON string frame.
    pub fn encode_ping(&self) -> String {
        Value::from(self.ping.as_str()).to_string()
    }

    /// The pong literal as a JSON string frame.
    pub fn encode_pong(&self) -> String {
        Value::from(self.pong.as_str()).to_string()
    }

    fn control(&self, literal: &str) -> Option<Frame> {
        if literal == self.pong {
            Some(Frame::Pong)
        } else if literal == self.ping {
            Some(Frame::Ping)
        } else {
            None
        }
    }
}

/// Body attached to every outbound event: `{ when, id?, payload }`.
///
/// `when` is milliseconds since the Unix epoch. `id` is omitted until the
/// session has been mounted.
pub fn envelope(when: DateTime<Utc>, session_id: Option<&str>, payload: Value) -> Value {
    let mut body = Map::new();
    body.insert("when".into(), json!(when.timestamp_millis()));
    if let Some(id) = session_id {
        body.insert("id".into(), json!(id));
    }
    body.insert("payload".into(), payload);
    Value::Object(body)
}
