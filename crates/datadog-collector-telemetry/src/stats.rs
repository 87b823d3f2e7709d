// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Commutative collection counters.
//!
//! A [`StatRecord`] holds one counter pair per telemetry kind. Records are
//! plain values: every operation touches only its own receiver, so batches
//! can be aggregated on concurrent paths and merged by the caller afterwards.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Telemetry kinds tracked by collection counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    Log,
}

/// One bytes/events counter pair. Subtraction clamps each field at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub bytes: u64,
    pub events: u64,
}

impl Counters {
    pub fn add(&mut self, other: Counters) {
        self.bytes = self.bytes.saturating_add(other.bytes);
        self.events = self.events.saturating_add(other.events);
    }

    pub fn subtract(&mut self, other: Counters) {
        self.bytes = self.bytes.saturating_sub(other.bytes);
        self.events = self.events.saturating_sub(other.events);
    }
}

/// A counter delta reported by the data plane, one message per unit of work.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsDelta {
    #[serde(default)]
    pub invocation_id: Option<String>,
    pub kind: StatKind,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub events: u64,
}

impl StatsDelta {
    fn counters(&self) -> Counters {
        Counters {
            bytes: self.bytes,
            events: self.events,
        }
    }
}

/// Aggregated collection counters, one entry per telemetry kind.
///
/// Serializes to the `collection_stats` section of a check-in report,
/// e.g. `{"log":{"bytes":6000,"events":60}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatRecord {
    pub log: Counters,
}

impl StatRecord {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters_mut(&mut self, kind: StatKind) -> &mut Counters {
        match kind {
            StatKind::Log => &mut self.log,
        }
    }

    /// Pointwise sum of `other` into `self`.
    pub fn add(&mut self, other: &StatRecord) {
        self.log.add(other.log);
    }

    /// Pointwise subtraction of `other` from `self`, clamped at zero.
    pub fn subtract(&mut self, other: &StatRecord) {
        self.log.subtract(other.log);
    }

    pub fn reset(&mut self) {
        *self = StatRecord::default();
    }

    /// Parses raw delta messages and adds them by kind.
    ///
    /// Messages that do not parse contribute zero. Returns how many were
    /// dropped so callers can surface the loss instead of hiding it.
    pub fn aggregate_add<S: AsRef<str>>(&mut self, messages: &[S]) -> u64 {
        self.aggregate(messages, false)
    }

    /// Parses raw delta messages and subtracts them by kind, clamped at zero.
    ///
    /// Returns the number of messages dropped as unparseable.
    pub fn aggregate_subtract<S: AsRef<str>>(&mut self, messages: &[S]) -> u64 {
        self.aggregate(messages, true)
    }

    fn aggregate<S: AsRef<str>>(&mut self, messages: &[S], subtract: bool) -> u64 {
        let mut dropped = 0;
        for raw in messages {
            match serde_json::from_str::<StatsDelta>(raw.as_ref()) {
                Ok(delta) => {
                    let counters = self.counters_mut(delta.kind);
                    if subtract {
                        counters.subtract(delta.counters());
                    } else {
                        counters.add(delta.counters());
                    }
                }
                Err(err) => {
                    dropped += 1;
                    debug!("Dropping unparseable stats delta: {err}");
                }
            }
        }
        dropped
    }
}
