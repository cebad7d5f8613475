//! Per-handler batching state.

use std::num::NonZeroUsize;

use serde_json::Value;

use crate::handler::CyclePolicy;

/// Buffers payloads until exactly `every` have arrived.
///
/// The buffer is emptied every time it reaches the threshold, so it never
/// holds more than `every - 1` payloads between calls.
#[derive(Debug, Clone)]
pub struct CycleAggregator {
    every: NonZeroUsize,
    exclusive: bool,
    accumulated: Vec<Value>,
}

impl CycleAggregator {
    pub fn new(every: NonZeroUsize, exclusive: bool) -> Self {
        Self {
            every,
            exclusive,
            accumulated: Vec::with_capacity(every.get()),
        }
    }

    pub fn from_policy(policy: &CyclePolicy) -> Self {
        Self::new(policy.threshold(), policy.is_exclusive())
    }

    /// Append a payload; returns the full batch, in arrival order, when the
    /// threshold is hit.
    pub fn push(&mut self, payload: Value) -> Option<Vec<Value>> {
        self.accumulated.push(payload);
        if self.accumulated.len() == self.every.get() {
            let batch = std::mem::replace(&mut self.accumulated, Vec::with_capacity(self.every.get()));
            Some(batch)
        } else {
            None
        }
    }

    pub fn every(&self) -> usize {
        self.every.get()
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Payloads waiting for the batch to fill.
    pub fn buffered(&self) -> usize {
        self.accumulated.len()
    }
}
