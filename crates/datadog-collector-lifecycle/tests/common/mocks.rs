// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock implementations of the controller's collaborators for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use datadog_collector_deadletter::{DeadLetterItem, DeadLetterStore, StoreError};
use datadog_collector_lifecycle::{
    AppService, AppServiceError, BackendClient, BackendError, CheckinAck, CheckinReport,
    CollectorIdentity, PersistedSettings, RuntimeState,
};
use datadog_collector_telemetry::{
    InvocationEntry, InvocationLog, LogPage, LogQueryError, QueueError, QueueMessage, StatsQueue,
};

/// Backend recording every call; registration hands out a fixed identity.
pub struct MockBackend {
    pub identity: CollectorIdentity,
    pub register_calls: AtomicU64,
    pub discover_calls: AtomicU64,
    pub register_bodies: Mutex<Vec<serde_json::Value>>,
    pub deregister_bodies: Mutex<Vec<serde_json::Value>>,
    pub checkin_reports: Mutex<Vec<serde_json::Value>>,
    pub ack: CheckinAck,
}

impl MockBackend {
    pub fn new() -> Self {
        MockBackend {
            identity: CollectorIdentity {
                host_id: "host-1".to_string(),
                source_id: "source-1".to_string(),
            },
            register_calls: AtomicU64::new(0),
            discover_calls: AtomicU64::new(0),
            register_bodies: Mutex::new(Vec::new()),
            deregister_bodies: Mutex::new(Vec::new()),
            checkin_reports: Mutex::new(Vec::new()),
            ack: CheckinAck::default(),
        }
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn discover_endpoint(
        &self,
        service: &str,
        residency: &str,
    ) -> Result<String, BackendError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://{service}.{residency}.test"))
    }

    async fn register(
        &self,
        _endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<CollectorIdentity, BackendError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.register_bodies.lock().unwrap().push(body.clone());
        Ok(self.identity.clone())
    }

    async fn deregister(
        &self,
        _endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<(), BackendError> {
        self.deregister_bodies.lock().unwrap().push(body.clone());
        Ok(())
    }

    async fn checkin(
        &self,
        _endpoint: &str,
        report: &CheckinReport,
    ) -> Result<CheckinAck, BackendError> {
        let value = serde_json::to_value(report).map_err(|err| BackendError::InvalidResponse {
            operation: "checkin",
            message: err.to_string(),
        })?;
        self.checkin_reports.lock().unwrap().push(value);
        Ok(self.ack.clone())
    }
}

/// App service with in-memory settings and a scriptable runtime state.
pub struct MockAppService {
    pub settings: Mutex<PersistedSettings>,
    pub runtime: Mutex<RuntimeState>,
    pub update_calls: AtomicU64,
}

impl MockAppService {
    pub fn new() -> Self {
        MockAppService {
            settings: Mutex::new(PersistedSettings::default()),
            runtime: Mutex::new(RuntimeState::Running),
            update_calls: AtomicU64::new(0),
        }
    }

    pub fn with_settings(settings: PersistedSettings) -> Self {
        let service = Self::new();
        *service.settings.lock().unwrap() = settings;
        service
    }
}

#[async_trait]
impl AppService for MockAppService {
    async fn runtime_state(&self) -> Result<RuntimeState, AppServiceError> {
        Ok(self.runtime.lock().unwrap().clone())
    }

    async fn load_settings(&self) -> Result<PersistedSettings, AppServiceError> {
        Ok(self.settings.lock().unwrap().clone())
    }

    async fn update_settings(&self, patch: &PersistedSettings) -> Result<(), AppServiceError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut settings = self.settings.lock().unwrap();
        *settings = settings.merged_with(patch);
        Ok(())
    }
}

/// Queue preloaded with delta messages; deletes always succeed.
pub struct MockQueue {
    backlog: u64,
    pending: Mutex<Vec<QueueMessage>>,
}

impl MockQueue {
    pub fn with_deltas(deltas: &[(u64, u64)]) -> Self {
        let pending: Vec<QueueMessage> = deltas
            .iter()
            .enumerate()
            .map(|(i, (bytes, events))| QueueMessage {
                id: format!("m{i}"),
                receipt: format!("m{i}-receipt"),
                text: format!("{{\"kind\":\"log\",\"bytes\":{bytes},\"events\":{events}}}"),
            })
            .collect();
        MockQueue {
            backlog: pending.len() as u64,
            pending: Mutex::new(pending),
        }
    }
}

#[async_trait]
impl StatsQueue for MockQueue {
    async fn approximate_backlog(&self) -> Result<u64, QueueError> {
        Ok(self.backlog)
    }

    async fn fetch_batch(
        &self,
        max_count: usize,
        _visibility: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut pending = self.pending.lock().unwrap();
        let take = max_count.min(pending.len());
        Ok(pending.drain(..take).collect())
    }

    async fn delete_message(&self, _id: &str, _receipt: &str) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Invocation log returning one fixed page per function.
pub struct MockInvocationLog {
    pages: HashMap<String, (usize, usize)>,
}

impl MockInvocationLog {
    pub fn new(counts: &[(&str, usize, usize)]) -> Self {
        MockInvocationLog {
            pages: counts
                .iter()
                .map(|(name, total, errors)| ((*name).to_string(), (*total, *errors)))
                .collect(),
        }
    }
}

#[async_trait]
impl InvocationLog for MockInvocationLog {
    async fn query(
        &self,
        function: &str,
        _not_before: SystemTime,
        _continuation: Option<&str>,
    ) -> Result<LogPage, LogQueryError> {
        let (total, errors) = self.pages.get(function).copied().unwrap_or((0, 0));
        let entries = (0..total)
            .map(|i| InvocationEntry {
                start_time: SystemTime::now(),
                error_details: (i < errors).then(|| "failed".to_string()),
            })
            .collect();
        Ok(LogPage {
            entries,
            continuation: None,
        })
    }
}

/// Dead-letter store with fixed items; reads and deletes always succeed.
pub struct MockDeadLetterStore {
    items: Vec<DeadLetterItem>,
    pub listing_fails: bool,
    pub deleted: Mutex<Vec<String>>,
}

impl MockDeadLetterStore {
    pub fn with_items(items: &[(&str, u64)]) -> Self {
        MockDeadLetterStore {
            items: items
                .iter()
                .map(|(name, size)| DeadLetterItem {
                    name: (*name).to_string(),
                    content_length: *size,
                })
                .collect(),
            listing_fails: false,
            deleted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DeadLetterStore for MockDeadLetterStore {
    async fn list(
        &self,
        prefix: &str,
        _page_size: Option<usize>,
    ) -> Result<Vec<DeadLetterItem>, StoreError> {
        if self.listing_fails {
            return Err(StoreError::List("server busy".to_string()));
        }
        Ok(self
            .items
            .iter()
            .filter(|item| item.name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn read_content(&self, name: &str) -> Result<String, StoreError> {
        Ok(format!("payload of {name}"))
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }
}
