// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Telemetry aggregation for serverless collector fleets.
//!
//! Reconciles self-reported collection counters delivered through an
//! at-least-once queue and computes per-function invocation statistics from
//! the platform's append-only invocation log.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod invocation_stats;
pub mod queue_stats;
pub mod stats;

pub use invocation_stats::{
    for_each_page, FunctionStats, FunctionStatsList, InvocationEntry, InvocationLog,
    InvocationStatsCollector, LogPage, LogQueryError,
};
pub use queue_stats::{QueueDrain, QueueError, QueueMessage, QueueStatsCollector, StatsQueue};
pub use stats::{Counters, StatKind, StatRecord, StatsDelta};
