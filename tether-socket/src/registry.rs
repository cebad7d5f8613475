//! Handler registry and inbound event dispatch.
//!
//! Records are keyed by event name. `unregister` removes a record outright;
//! `disable` keeps it (for introspection) but makes dispatch skip it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use tether_core::error::{TetherError, TetherResult};

use crate::cycle::CycleAggregator;
use crate::handler::{BatchCallback, HandlerConfig};

/// What dispatch did with an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handler ran (callback, ack, and/or a non-exclusive cycle step).
    Delivered,
    /// Payload was absorbed by an exclusive cycle.
    Batched,
    /// Handler exists but is disabled.
    Disabled,
    /// No handler registered for this event.
    Unhandled,
}

/// Session facts dispatch needs to build acks.
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext<'a> {
    pub now: DateTime<Utc>,
    pub session_id: Option<&'a str>,
}

/// A registered handler plus its bookkeeping.
pub struct HandlerRecord {
    event: String,
    config: HandlerConfig,
    cycle: Option<CycleAggregator>,
    registered_on: DateTime<Utc>,
    disabled: bool,
    last_trigger: Option<DateTime<Utc>>,
}

impl HandlerRecord {
    fn new(event: String, config: HandlerConfig, now: DateTime<Utc>) -> Self {
        let cycle = config.cycle().map(CycleAggregator::from_policy);
        Self {
            event,
            config,
            cycle,
            registered_on: now,
            disabled: false,
            last_trigger: None,
        }
    }

    fn replace_config(&mut self, config: HandlerConfig) {
        self.cycle = config.cycle().map(CycleAggregator::from_policy);
        self.config = config;
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn registered_on(&self) -> DateTime<Utc> {
        self.registered_on
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn last_trigger(&self) -> Option<DateTime<Utc>> {
        self.last_trigger
    }

    /// Payloads buffered by the cycle policy, if any.
    pub fn buffered(&self) -> usize {
        self.cycle.as_ref().map_or(0, CycleAggregator::buffered)
    }

    pub fn info(&self) -> HandlerInfo {
        HandlerInfo {
            event: self.event.clone(),
            registered_on: self.registered_on,
            disabled: self.disabled,
            last_trigger: self.last_trigger,
            has_callback: self.config.event_callback().is_some(),
            has_ack: self.config.ack().is_some(),
            cycle_every: self.cycle.as_ref().map(CycleAggregator::every),
            buffered: self.buffered(),
        }
    }
}

/// Read-only view of a handler record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerInfo {
    pub event: String,
    pub registered_on: DateTime<Utc>,
    pub disabled: bool,
    pub last_trigger: Option<DateTime<Utc>>,
    pub has_callback: bool,
    pub has_ack: bool,
    pub cycle_every: Option<usize>,
    pub buffered: usize,
}

/// Event name → handler record.
#[derive(Default)]
pub struct HandlerRegistry {
    records: HashMap<String, HandlerRecord>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handler, or swap the config of an existing one.
    ///
    /// A replaced record keeps its `disabled` flag, `registered_on` and
    /// trigger history; only the cycle buffer restarts under the new
    /// policy. Returns true if a record was replaced.
    pub fn register(&mut self, event: impl Into<String>, config: HandlerConfig) -> bool {
        let event = event.into();
        match self.records.get_mut(&event) {
            Some(record) => {
                record.replace_config(config);
                debug!("handler replaced for '{event}'");
                true
            }
            None => {
                let record = HandlerRecord::new(event.clone(), config, Utc::now());
                self.records.insert(event.clone(), record);
                debug!("handler registered for '{event}'");
                false
            }
        }
    }

    /// Remove a handler entirely. Returns true if one existed.
    pub fn unregister(&mut self, event: &str) -> bool {
        let removed = self.records.remove(event).is_some();
        if removed {
            debug!("handler unregistered for '{event}'");
        }
        removed
    }

    /// Soft-off: keep the record, skip it on dispatch.
    pub fn disable(&mut self, event: &str) -> bool {
        self.set_disabled(event, true)
    }

    /// Undo [`disable`](Self::disable).
    pub fn enable(&mut self, event: &str) -> bool {
        self.set_disabled(event, false)
    }

    fn set_disabled(&mut self, event: &str, disabled: bool) -> bool {
        match self.records.get_mut(event) {
            Some(record) => {
                record.disabled = disabled;
                debug!("handler for '{event}' {}", if disabled { "disabled" } else { "enabled" });
                true
            }
            None => false,
        }
    }

    pub fn get(&self, event: &str) -> Option<&HandlerRecord> {
        self.records.get(event)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.records.contains_key(event)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every record, sorted by event name.
    pub fn infos(&self) -> Vec<HandlerInfo> {
        let mut infos: Vec<HandlerInfo> = self.records.values().map(HandlerRecord::info).collect();
        infos.sort_by(|a, b| a.event.cmp(&b.event));
        infos
    }

    /// Route one inbound event to its handler.
    ///
    /// The ack, if configured, goes out through `send_ack` before any
    /// callback runs, so it reflects receipt rather than processing.
    /// A handler with nothing configured is a registration bug and is
    /// returned as [`TetherError::UnconfiguredHandler`].
    pub fn dispatch<F>(
        &mut self,
        event: &str,
        payload: Value,
        ctx: DispatchContext<'_>,
        mut send_ack: F,
    ) -> TetherResult<Dispatch>
    where
        F: FnMut(String, Value),
    {
        let Some(record) = self.records.get_mut(event) else {
            warn!("handler not found for event '{event}'");
            return Ok(Dispatch::Unhandled);
        };

        if record.disabled {
            trace!("handler for '{event}' is disabled, dropping");
            return Ok(Dispatch::Disabled);
        }

        if !record.config.is_configured() {
            return Err(TetherError::UnconfiguredHandler(event.to_string()));
        }

        if let Some(ack) = record.config.ack() {
            send_ack(ack.event_name(event), ack.body(&payload, ctx.now, ctx.session_id));
        }

        record.last_trigger = Some(ctx.now);

        if let (Some(cycle), Some(policy)) = (record.cycle.as_mut(), record.config.cycle()) {
            if cycle.is_exclusive() {
                cycle_step(event, cycle, policy.batch_callback(), payload);
                return Ok(Dispatch::Batched);
            }
            cycle_step(event, cycle, policy.batch_callback(), payload.clone());
        }

        if let Some(callback) = record.config.event_callback() {
            callback(payload);
        }

        Ok(Dispatch::Delivered)
    }
}

fn cycle_step(event: &str, cycle: &mut CycleAggregator, on_batch: &BatchCallback, payload: Value) {
    match cycle.push(payload) {
        Some(batch) => {
            debug!("cycle for '{event}' complete ({} payloads)", batch.len());
            on_batch(batch);
        }
        None => trace!("cycle for '{event}': {}/{}", cycle.buffered(), cycle.every()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{AckPolicy, CyclePolicy, HandlerDescriptor};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn ctx(session_id: Option<&str>) -> DispatchContext<'_> {
        DispatchContext {
            now: DateTime::from_timestamp_millis(1_000).unwrap(),
            session_id,
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, HandlerConfig) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, HandlerConfig::callback(move |v| sink.lock().unwrap().push(v)))
    }

    fn no_ack(_: String, _: Value) {
        panic!("no ack expected");
    }

    #[test]
    fn test_dispatch_to_callback() {
        let mut registry = HandlerRegistry::new();
        let (seen, config) = recorder();
        registry.register("chat", config);

        let outcome = registry.dispatch("chat", json!({"text": "hi"}), ctx(None), no_ack).unwrap();
        assert_eq!(outcome, Dispatch::Delivered);
        assert_eq!(*seen.lock().unwrap(), vec![json!({"text": "hi"})]);
        assert!(registry.get("chat").unwrap().last_trigger().is_some());
    }

    #[test]
    fn test_unknown_event_is_not_an_error() {
        let mut registry = HandlerRegistry::new();
        let outcome = registry.dispatch("nobody", json!(1), ctx(None), no_ack).unwrap();
        assert_eq!(outcome, Dispatch::Unhandled);
    }

    #[test]
    fn test_disable_keeps_record_but_skips() {
        let mut registry = HandlerRegistry::new();
        let (seen, config) = recorder();
        registry.register("chat", config);
        assert!(registry.disable("chat"));

        let outcome = registry.dispatch("chat", json!(1), ctx(None), no_ack).unwrap();
        assert_eq!(outcome, Dispatch::Disabled);
        assert!(seen.lock().unwrap().is_empty());
        assert!(registry.contains("chat"));
        assert!(registry.get("chat").unwrap().is_disabled());
        assert_eq!(registry.get("chat").unwrap().last_trigger(), None);

        assert!(registry.enable("chat"));
        registry.dispatch("chat", json!(2), ctx(None), no_ack).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![json!(2)]);
    }

    #[test]
    fn test_unregister_removes_record() {
        let mut registry = HandlerRegistry::new();
        registry.register("chat", HandlerConfig::callback(|_| {}));
        assert!(registry.unregister("chat"));
        assert!(!registry.unregister("chat"));
        assert!(registry.is_empty());
        assert!(!registry.disable("chat"));
    }

    #[test]
    fn test_register_replaces_config() {
        let mut registry = HandlerRegistry::new();
        let (first, config) = recorder();
        assert!(!registry.register("chat", config));
        let (second, config) = recorder();
        assert!(registry.register("chat", config));

        registry.dispatch("chat", json!(1), ctx(None), no_ack).unwrap();
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_keeps_record_state() {
        let mut registry = HandlerRegistry::new();
        let (_, config) = recorder();
        registry.register("chat", config);
        registry.dispatch("chat", json!(1), ctx(None), no_ack).unwrap();
        let registered_on = registry.get("chat").unwrap().registered_on();
        let last_trigger = registry.get("chat").unwrap().last_trigger();
        registry.disable("chat");

        let (seen, config) = recorder();
        assert!(registry.register("chat", config));

        let record = registry.get("chat").unwrap();
        assert!(record.is_disabled());
        assert_eq!(record.registered_on(), registered_on);
        assert_eq!(record.last_trigger(), last_trigger);

        let outcome = registry.dispatch("chat", json!(2), ctx(None), no_ack).unwrap();
        assert_eq!(outcome, Dispatch::Disabled);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_register_restarts_cycle_buffer() {
        let mut registry = HandlerRegistry::new();
        let policy = CyclePolicy::every(3, |_| {}).unwrap();
        registry.register("tick", HandlerDescriptor::new().cycle(policy).into());
        registry.dispatch("tick", json!(1), ctx(None), no_ack).unwrap();
        assert_eq!(registry.get("tick").unwrap().buffered(), 1);

        let policy = CyclePolicy::every(2, |_| {}).unwrap();
        registry.register("tick", HandlerDescriptor::new().cycle(policy).into());
        let record = registry.get("tick").unwrap();
        assert_eq!(record.buffered(), 0);
        assert_eq!(record.info().cycle_every, Some(2));
    }

    #[test]
    fn test_unconfigured_handler_surfaces() {
        let mut registry = HandlerRegistry::new();
        registry.register("chat", HandlerDescriptor::new().into());
        let err = registry.dispatch("chat", json!(1), ctx(None), no_ack).unwrap_err();
        assert!(matches!(err, TetherError::UnconfiguredHandler(ref e) if e == "chat"));
    }

    #[test]
    fn test_ack_sent_before_callback() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let cb_order = order.clone();
        let mut registry = HandlerRegistry::new();
        registry.register(
            "foo",
            HandlerDescriptor::new()
                .ack(AckPolicy::new())
                .callback(move |_| cb_order.lock().unwrap().push("callback".to_string()))
                .into(),
        );

        let mut acks = Vec::new();
        registry
            .dispatch("foo", json!({"n": 1}), ctx(Some("abc")), |name, body| {
                order.lock().unwrap().push("ack".to_string());
                acks.push((name, body));
            })
            .unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["ack", "callback"]);
        assert_eq!(acks, vec![("foo-ack".to_string(), json!({"when": 1_000, "id": "abc"}))]);
    }

    #[test]
    fn test_exclusive_cycle_replaces_callback() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let per_message = seen.clone();
        let mut registry = HandlerRegistry::new();
        registry.register(
            "tick",
            HandlerDescriptor::new()
                .callback(move |v| per_message.lock().unwrap().push(v))
                .cycle(CyclePolicy::every(2, move |b| sink.lock().unwrap().push(b)).unwrap().exclusive())
                .into(),
        );

        for i in 0..5 {
            let outcome = registry.dispatch("tick", json!(i), ctx(None), no_ack).unwrap();
            assert_eq!(outcome, Dispatch::Batched);
        }
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(
            *batches.lock().unwrap(),
            vec![vec![json!(0), json!(1)], vec![json!(2), json!(3)]]
        );
        assert_eq!(registry.get("tick").unwrap().buffered(), 1);
    }

    #[test]
    fn test_non_exclusive_cycle_also_calls_back() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let per_message = seen.clone();
        let mut registry = HandlerRegistry::new();
        registry.register(
            "tick",
            HandlerDescriptor::new()
                .callback(move |v| per_message.lock().unwrap().push(v))
                .cycle(CyclePolicy::every(3, move |b| sink.lock().unwrap().push(b)).unwrap())
                .into(),
        );

        for i in 0..3 {
            registry.dispatch("tick", json!(i), ctx(None), no_ack).unwrap();
        }
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(batches.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_infos_sorted() {
        let mut registry = HandlerRegistry::new();
        registry.register("b", HandlerConfig::callback(|_| {}));
        registry.register(
            "a",
            HandlerDescriptor::new()
                .cycle(CyclePolicy::every(4, |_| {}).unwrap())
                .into(),
        );
        registry.disable("b");
        let infos = registry.infos();
        assert_eq!(infos[0].event, "a");
        assert_eq!(infos[0].cycle_every, Some(4));
        assert!(!infos[0].has_callback);
        assert!(infos[1].disabled);
    }
}
