// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drains the durable counter-delta queue and reconciles its contents into
//! a [`StatRecord`].
//!
//! The queue offers at-least-once delivery: a fetched message becomes
//! visible again unless it is deleted within its visibility window. Deltas
//! are counted on receipt and rolled back for every delete that fails, so
//! the error introduced by delete failures is bounded to exactly those
//! messages, which are recounted on redelivery in a later cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::stats::StatRecord;

/// Number of messages requested per fetch round.
pub const QUEUE_BATCH_SIZE: usize = 32;

/// How long fetched messages stay hidden from other consumers. Must cover
/// the delete round-trip for a full batch.
pub const QUEUE_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue has not been provisioned yet. Benign: reported as empty.
    #[error("stats queue does not exist")]
    NotFound,

    #[error("stats queue unavailable: {0}")]
    Unavailable(String),

    #[error("failed to delete message {id}: {reason}")]
    DeleteFailed { id: String, reason: String },
}

/// A message fetched from the counter-delta queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    /// Pop receipt required to delete this delivery of the message.
    pub receipt: String,
    pub text: String,
}

/// Durable at-least-once queue carrying collection counter deltas.
#[async_trait]
pub trait StatsQueue: Send + Sync {
    /// Approximate number of messages currently in the queue.
    async fn approximate_backlog(&self) -> Result<u64, QueueError>;

    /// Fetch up to `max_count` messages, hiding them for `visibility`.
    /// Returning fewer messages than requested is a normal partial batch.
    async fn fetch_batch(
        &self,
        max_count: usize,
        visibility: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    async fn delete_message(&self, id: &str, receipt: &str) -> Result<(), QueueError>;
}

/// Result of one drain pass. Totals are best-effort whenever `errors` is
/// non-empty.
#[derive(Debug, Default)]
pub struct QueueDrain {
    pub stats: StatRecord,
    /// Raw messages dropped because they did not parse.
    pub skipped: u64,
    pub errors: Vec<QueueError>,
}

/// Drains the stats queue in bounded batches and reconciles the deltas.
pub struct QueueStatsCollector {
    queue: Arc<dyn StatsQueue>,
    batch_size: usize,
    visibility: Duration,
}

impl QueueStatsCollector {
    pub fn new(queue: Arc<dyn StatsQueue>) -> Self {
        QueueStatsCollector {
            queue,
            batch_size: QUEUE_BATCH_SIZE,
            visibility: QUEUE_VISIBILITY_TIMEOUT,
        }
    }

    /// Performs one best-effort drain pass over the queue.
    ///
    /// The backlog bound is observed once at the start; messages arriving
    /// while the drain runs are left for the next check-in cycle. A missing
    /// queue yields an empty drain with no error. Delete failures roll the
    /// affected message's delta back out of the running total and never stop
    /// the pass; a failed fetch ends the pass early with the error recorded.
    pub async fn collect(&self) -> QueueDrain {
        let mut drain = QueueDrain::default();

        let backlog = match self.queue.approximate_backlog().await {
            Ok(backlog) => backlog,
            Err(QueueError::NotFound) => {
                debug!("Stats queue not provisioned yet, reporting empty stats");
                return drain;
            }
            Err(err) => {
                drain.errors.push(err);
                return drain;
            }
        };

        let mut processed: u64 = 0;
        while processed < backlog {
            let batch = match self.queue.fetch_batch(self.batch_size, self.visibility).await {
                Ok(batch) => batch,
                Err(QueueError::NotFound) => break,
                Err(err) => {
                    drain.errors.push(err);
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            processed += batch.len() as u64;

            let texts: Vec<&str> = batch.iter().map(|m| m.text.as_str()).collect();
            drain.skipped += drain.stats.aggregate_add(&texts);

            // Deletes run concurrently within the batch; each failed delete
            // rolls its own delta back out of the running total.
            let deletes = join_all(
                batch
                    .iter()
                    .map(|m| self.queue.delete_message(&m.id, &m.receipt)),
            )
            .await;
            for (message, result) in batch.iter().zip(deletes) {
                if let Err(err) = result {
                    drain.stats.aggregate_subtract(&[message.text.as_str()]);
                    drain.errors.push(err);
                }
            }
        }

        if drain.skipped > 0 {
            warn!("Dropped {} unparseable stats messages", drain.skipped);
        }
        drain
    }
}
