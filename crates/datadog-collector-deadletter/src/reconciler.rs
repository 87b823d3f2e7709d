// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dead-letter listing, statistics and bounded reprocessing.
//!
//! Items are read and handed to a caller-supplied handler; only the items
//! the handler accepts are deleted. Failed items stay in place for a later
//! pass, there is no in-process retry.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::batch::map_bounded;

/// Maximum number of items processed concurrently in one sweep.
pub const PROCESS_CONCURRENCY: usize = 20;

/// Listing page size used when reprocessing.
pub const LIST_PAGE_SIZE: usize = 100;

/// How many items `stats` samples for diagnostics.
pub const STATS_SAMPLE_COUNT: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The container has not been provisioned yet. Benign: treated as empty.
    #[error("dead-letter container does not exist")]
    NotFound,

    #[error("dead-letter listing failed: {0}")]
    List(String),

    #[error("failed to read {name}: {reason}")]
    Read { name: String, reason: String },

    #[error("failed to delete {name}: {reason}")]
    Delete { name: String, reason: String },
}

/// Handler rejection, carried verbatim into the item's outcome.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("handler rejected {name}: {reason}")]
    Handler { name: String, reason: String },
}

/// Listing metadata for one dead-letter item.
///
/// Names are hierarchical: the collector's site prefix followed by the
/// source function and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetterItem {
    pub name: String,
    pub content_length: u64,
}

/// Container holding undeliverable payloads.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// List one page of items under `prefix`. `page_size: None` uses the
    /// platform's default page size.
    async fn list(
        &self,
        prefix: &str,
        page_size: Option<usize>,
    ) -> Result<Vec<DeadLetterItem>, StoreError>;

    async fn read_content(&self, name: &str) -> Result<String, StoreError>;

    async fn delete(&self, name: &str) -> Result<(), StoreError>;
}

/// Caller-supplied hand-off for dead-letter payloads. Returning `Ok` lets
/// the reconciler delete the item.
#[async_trait]
pub trait DeadLetterHandler: Send + Sync {
    async fn handle(&self, item: &DeadLetterItem, content: &str) -> Result<(), HandlerError>;
}

/// A sampled item; content is best-effort and omitted when unreadable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetterSample {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Dead-letter statistics from a single default-size listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeadLetterStats {
    pub count: u64,
    /// Largest content length among listed items; absent when none exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    pub samples: Vec<DeadLetterSample>,
}

/// Outcome of one item in a processing sweep, in listing order.
#[derive(Debug)]
pub struct ItemOutcome {
    pub item: DeadLetterItem,
    pub result: Result<(), ProcessError>,
}

#[derive(Debug, Clone)]
pub struct DeadLetterConfig {
    /// Site prefix the collector's dead letters live under.
    pub prefix: String,
    pub page_size: usize,
    pub concurrency: usize,
}

impl DeadLetterConfig {
    pub fn new(prefix: impl Into<String>) -> Self {
        DeadLetterConfig {
            prefix: prefix.into(),
            page_size: LIST_PAGE_SIZE,
            concurrency: PROCESS_CONCURRENCY,
        }
    }
}

/// Lists, reprocesses and reclaims dead letters under one site prefix.
pub struct DeadLetterReconciler {
    store: Arc<dyn DeadLetterStore>,
    config: DeadLetterConfig,
}

impl DeadLetterReconciler {
    pub fn new(store: Arc<dyn DeadLetterStore>, config: DeadLetterConfig) -> Self {
        DeadLetterReconciler { store, config }
    }

    /// Entry count, maximum size and up to two content samples from the
    /// first listing page. Sample reads are best-effort; a missing container
    /// reports empty statistics.
    pub async fn stats(&self) -> Result<DeadLetterStats, StoreError> {
        let items = match self.store.list(&self.config.prefix, None).await {
            Ok(items) => items,
            Err(StoreError::NotFound) => Vec::new(),
            Err(err) => return Err(err),
        };

        let max_size = items.iter().map(|item| item.content_length).max();
        let mut samples = Vec::new();
        for item in items.iter().take(STATS_SAMPLE_COUNT) {
            let content = match self.store.read_content(&item.name).await {
                Ok(content) => Some(content),
                Err(err) => {
                    debug!("Could not sample dead letter {}: {err}", item.name);
                    None
                }
            };
            samples.push(DeadLetterSample {
                name: item.name.clone(),
                content,
            });
        }

        if !samples.is_empty() {
            match serde_json::to_string(&samples) {
                Ok(json) => debug!("Dead-letter samples: {json}"),
                Err(err) => debug!("Could not serialize dead-letter samples: {err}"),
            }
        }

        Ok(DeadLetterStats {
            count: items.len() as u64,
            max_size,
            samples,
        })
    }

    /// Reprocesses one page of dead letters through `handler`.
    ///
    /// Each worker reads the item, hands it off, and deletes it when the
    /// handler accepts it. Every listed item yields exactly one outcome;
    /// a single item's failure never blocks reclaiming the others. Only the
    /// listing step can fail the call.
    pub async fn process_all(
        &self,
        handler: Arc<dyn DeadLetterHandler>,
    ) -> Result<Vec<ItemOutcome>, StoreError> {
        let items = match self
            .store
            .list(&self.config.prefix, Some(self.config.page_size))
            .await
        {
            Ok(items) => items,
            Err(StoreError::NotFound) => Vec::new(),
            Err(err) => return Err(err),
        };
        debug!("Listed {} dead letters", items.len());

        let outcomes = map_bounded(items, self.config.concurrency, |_, item| {
            let handler = Arc::clone(&handler);
            async move {
                let result = self.process_one(&item, handler.as_ref()).await;
                if let Err(err) = &result {
                    warn!("Dead letter {} left in place: {err}", item.name);
                }
                ItemOutcome { item, result }
            }
        })
        .await;

        Ok(outcomes)
    }

    async fn process_one(
        &self,
        item: &DeadLetterItem,
        handler: &dyn DeadLetterHandler,
    ) -> Result<(), ProcessError> {
        debug!("Processing dead letter {}", item.name);
        let content = self.store.read_content(&item.name).await?;
        handler
            .handle(item, &content)
            .await
            .map_err(|err| ProcessError::Handler {
                name: item.name.clone(),
                reason: err.to_string(),
            })?;
        self.store.delete(&item.name).await?;
        Ok(())
    }
}
