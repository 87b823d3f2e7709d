// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-function invocation statistics over a fixed trailing window.
//!
//! The hosting platform appends one row per function invocation to a log
//! that is queried in pages via continuation tokens. Functions are queried
//! independently so a failing query degrades only its own entry.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use futures::future::join_all;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// Trailing window over which invocation statistics are computed.
pub const STATS_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, thiserror::Error)]
pub enum LogQueryError {
    #[error("invocation log query failed: {0}")]
    Query(String),
}

/// One row of the append-only invocation log.
#[derive(Debug, Clone)]
pub struct InvocationEntry {
    pub start_time: SystemTime,
    /// Present when the invocation ended in error.
    pub error_details: Option<String>,
}

/// One page of invocation log results.
#[derive(Debug, Default)]
pub struct LogPage {
    pub entries: Vec<InvocationEntry>,
    /// Opaque cursor; `Some` means more results remain.
    pub continuation: Option<String>,
}

/// Append-only per-function invocation log, queried in pages.
#[async_trait]
pub trait InvocationLog: Send + Sync {
    /// Query entries for `function` whose start time is at or after
    /// `not_before`, resuming from `continuation` when given.
    async fn query(
        &self,
        function: &str,
        not_before: SystemTime,
        continuation: Option<&str>,
    ) -> Result<LogPage, LogQueryError>;
}

/// Per-function outcome: counts, or the error that replaced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FunctionStats {
    Counts { invocations: u64, errors: u64 },
    Failed { error: String },
}

/// Function statistics in tracked-function order.
///
/// Serializes as a list of single-entry maps, the `statistics` wire shape:
/// `[{"Master":{"invocations":2,"errors":0}}, {"Collector":{...}}]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionStatsList(pub Vec<(String, FunctionStats)>);

impl Serialize for FunctionStatsList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Entry<'a>(&'a str, &'a FunctionStats);

        impl Serialize for Entry<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(self.0, self.1)?;
                map.end()
            }
        }

        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for (name, stats) in &self.0 {
            seq.serialize_element(&Entry(name, stats))?;
        }
        seq.end()
    }
}

/// Drives a continuation-token paged query to exhaustion.
///
/// `fetch` receives the token from the previous page (`None` on the first
/// call) and `visit` sees every page in order. Stops after the first page
/// that carries no continuation token.
pub async fn for_each_page<F, Fut, G>(mut fetch: F, mut visit: G) -> Result<(), LogQueryError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: std::future::Future<Output = Result<LogPage, LogQueryError>>,
    G: FnMut(&LogPage),
{
    let mut continuation: Option<String> = None;
    loop {
        let page = fetch(continuation.take()).await?;
        visit(&page);
        match page.continuation {
            Some(token) => continuation = Some(token),
            None => return Ok(()),
        }
    }
}

/// Computes invocation/error counts for every tracked function.
pub struct InvocationStatsCollector {
    log: Arc<dyn InvocationLog>,
    functions: Vec<String>,
}

impl InvocationStatsCollector {
    pub fn new(log: Arc<dyn InvocationLog>, functions: Vec<String>) -> Self {
        InvocationStatsCollector { log, functions }
    }

    /// Statistics for the fixed trailing window ending at `window_end`.
    ///
    /// Functions are queried concurrently and merged in tracked order. A
    /// function with no matching rows reports zero counts; a function whose
    /// query fails reports the error in place of counts.
    pub async fn collect(&self, window_end: SystemTime) -> FunctionStatsList {
        let not_before = window_end
            .checked_sub(STATS_WINDOW)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let results = join_all(
            self.functions
                .iter()
                .map(|function| self.function_stats(function, not_before)),
        )
        .await;
        FunctionStatsList(self.functions.iter().cloned().zip(results).collect())
    }

    async fn function_stats(&self, function: &str, not_before: SystemTime) -> FunctionStats {
        let mut invocations: u64 = 0;
        let mut errors: u64 = 0;

        let walked = for_each_page(
            |continuation| {
                let log = Arc::clone(&self.log);
                async move {
                    log.query(function, not_before, continuation.as_deref())
                        .await
                }
            },
            |page| {
                invocations += page.entries.len() as u64;
                errors += page
                    .entries
                    .iter()
                    .filter(|entry| entry.error_details.is_some())
                    .count() as u64;
            },
        )
        .await;

        match walked {
            Ok(()) => FunctionStats::Counts {
                invocations,
                errors,
            },
            // Partial counts from earlier pages are discarded on error.
            Err(err) => FunctionStats::Failed {
                error: err.to_string(),
            },
        }
    }
}
