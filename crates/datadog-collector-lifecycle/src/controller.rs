// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collector lifecycle controller.
//!
//! Drives the `Unregistered → Registered → (Checking-in)*` sequence:
//! endpoint discovery, idempotent registration, health checks and the
//! periodic check-in that merges the telemetry sections into one report.

use std::sync::Arc;
use std::time::SystemTime;

use futures::future::join_all;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use datadog_collector_deadletter::{
    DeadLetterConfig, DeadLetterHandler, DeadLetterReconciler, DeadLetterStats,
    DeadLetterStore, ItemOutcome, StoreError,
};
use datadog_collector_telemetry::{
    FunctionStatsList, InvocationLog, InvocationStatsCollector, QueueDrain, QueueStatsCollector,
    StatsQueue,
};

use crate::app_service::{AppService, PersistedSettings, RuntimeState};
use crate::backend::{BackendClient, CheckinAck, CollectorIdentity, DiscoveredEndpoints};
use crate::config::CollectorConfig;
use crate::error::LifecycleError;
use crate::health::{HealthCheck, HealthCheckError, HealthReport, ERROR_CODE_APP_UNAVAILABLE};
use crate::report::{CheckinReport, DeadLetterCounts};

/// Service name resolved to the control endpoint during discovery.
pub const SERVICE_CONTROL: &str = "collector_control";

/// Service name resolved to the ingestion endpoint handed to the data plane.
pub const SERVICE_INGEST: &str = "log_ingest";

/// Result of one check-in cycle: the submitted report and the control
/// plane's acknowledgement.
#[derive(Debug)]
pub struct CheckinOutcome {
    pub report: CheckinReport,
    pub ack: CheckinAck,
}

/// Composes the telemetry collectors and control-plane collaborators into
/// the collector's lifecycle operations.
pub struct CollectorController {
    config: CollectorConfig,
    backend: Arc<dyn BackendClient>,
    app_service: Arc<dyn AppService>,
    queue: QueueStatsCollector,
    invocations: InvocationStatsCollector,
    dead_letters: DeadLetterReconciler,
    custom_checks: Vec<Arc<dyn HealthCheck>>,
    identity: RwLock<Option<CollectorIdentity>>,
    endpoints: RwLock<Option<DiscoveredEndpoints>>,
}

impl CollectorController {
    pub fn new(
        config: CollectorConfig,
        backend: Arc<dyn BackendClient>,
        app_service: Arc<dyn AppService>,
        queue: Arc<dyn StatsQueue>,
        invocation_log: Arc<dyn InvocationLog>,
        dead_letter_store: Arc<dyn DeadLetterStore>,
    ) -> Self {
        let identity = config.identity();
        let queue = QueueStatsCollector::new(queue);
        let invocations =
            InvocationStatsCollector::new(invocation_log, config.functions.clone());
        let dead_letters = DeadLetterReconciler::new(
            dead_letter_store,
            DeadLetterConfig::new(config.app_name.clone()),
        );
        CollectorController {
            config,
            backend,
            app_service,
            queue,
            invocations,
            dead_letters,
            custom_checks: Vec::new(),
            identity: RwLock::new(identity),
            endpoints: RwLock::new(None),
        }
    }

    /// Add caller-supplied health checks, run after the built-in one.
    pub fn with_health_checks(mut self, checks: Vec<Arc<dyn HealthCheck>>) -> Self {
        self.custom_checks = checks;
        self
    }

    /// Ensure control-service endpoints are known.
    ///
    /// Reuses endpoints already adopted or previously persisted unless
    /// `force` is set; otherwise discovers them per residency, persists the
    /// result, and adopts it.
    pub async fn ensure_endpoints(
        &self,
        force: bool,
    ) -> Result<DiscoveredEndpoints, LifecycleError> {
        if !force {
            if let Some(endpoints) = self.endpoints.read().await.clone() {
                return Ok(endpoints);
            }
            if let Some(endpoints) = self.app_service.load_settings().await?.endpoints {
                debug!("Reusing persisted control endpoints");
                *self.endpoints.write().await = Some(endpoints.clone());
                return Ok(endpoints);
            }
        }

        let residency = &self.config.residency;
        let control = self
            .backend
            .discover_endpoint(SERVICE_CONTROL, residency)
            .await?;
        let ingest = self
            .backend
            .discover_endpoint(SERVICE_INGEST, residency)
            .await?;
        let endpoints = DiscoveredEndpoints { control, ingest };
        info!("Discovered control endpoint {}", endpoints.control);

        self.app_service
            .update_settings(&PersistedSettings {
                endpoints: Some(endpoints.clone()),
                ..Default::default()
            })
            .await?;
        *self.endpoints.write().await = Some(endpoints.clone());
        Ok(endpoints)
    }

    /// Identity held in memory or in persisted settings, if any.
    async fn held_identity(&self) -> Result<Option<CollectorIdentity>, LifecycleError> {
        if let Some(identity) = self.identity.read().await.clone() {
            return Ok(Some(identity));
        }
        let settings = self.app_service.load_settings().await?;
        if let Some(identity) = settings.identity {
            *self.identity.write().await = Some(identity.clone());
            return Ok(Some(identity));
        }
        Ok(None)
    }

    /// Register this collector with the control plane.
    ///
    /// Idempotent: when an identity is already held (in memory, in
    /// configuration, or persisted) it is returned as-is and no backend
    /// call is made. A freshly assigned identity is persisted before it is
    /// adopted in memory.
    pub async fn register(
        &self,
        extra_fields: serde_json::Value,
    ) -> Result<CollectorIdentity, LifecycleError> {
        let endpoints = self.ensure_endpoints(false).await?;

        if let Some(identity) = self.held_identity().await? {
            debug!("Collector already registered as host {}", identity.host_id);
            return Ok(identity);
        }

        let body = self.collector_body(extra_fields, None);
        let identity = self.backend.register(&endpoints.control, &body).await?;
        self.app_service
            .update_settings(&PersistedSettings {
                identity: Some(identity.clone()),
                ..Default::default()
            })
            .await?;
        *self.identity.write().await = Some(identity.clone());
        info!(
            "Registered collector host {} source {}",
            identity.host_id, identity.source_id
        );
        Ok(identity)
    }

    /// Deregister this collector. Local state is left untouched.
    pub async fn deregister(&self, extra_fields: serde_json::Value) -> Result<(), LifecycleError> {
        let endpoints = self.ensure_endpoints(false).await?;
        let identity = self
            .held_identity()
            .await?
            .ok_or(LifecycleError::NotRegistered)?;
        let body = self.collector_body(extra_fields, Some(&identity));
        self.backend.deregister(&endpoints.control, &body).await?;
        info!("Deregistered collector host {}", identity.host_id);
        Ok(())
    }

    /// Run one check-in cycle.
    ///
    /// Health checks and the three telemetry sources run concurrently; a
    /// failing telemetry source degrades its section of the report instead
    /// of aborting the check-in. Only backend rejection of the submission
    /// itself fails the call.
    pub async fn checkin(&self, timestamp: SystemTime) -> Result<CheckinOutcome, LifecycleError> {
        let endpoints = self.ensure_endpoints(false).await?;
        let identity = self
            .held_identity()
            .await?
            .ok_or(LifecycleError::NotRegistered)?;

        let (health, drain, statistics, dead_letters) = tokio::join!(
            self.health_status(),
            self.queue.collect(),
            self.invocations.collect(timestamp),
            self.dead_letters.stats(),
        );

        if !drain.errors.is_empty() {
            warn!(
                "Queue drain finished with {} errors, collection stats are best-effort",
                drain.errors.len()
            );
        }
        let dl_stats = match dead_letters {
            Ok(stats) => Some(DeadLetterCounts::from(&stats)),
            Err(err) => {
                warn!("Dead-letter stats unavailable this cycle: {err}");
                None
            }
        };

        let report = CheckinReport {
            version: self.config.version.clone(),
            collector_type: self.config.collector_type.clone(),
            account_id: self.config.account_id.clone(),
            tenant_id: self.config.tenant_id.clone(),
            host_id: identity.host_id,
            source_id: identity.source_id,
            health,
            statistics,
            collection_stats: drain.stats,
            dl_stats,
        };

        let ack = self.backend.checkin(&endpoints.control, &report).await?;
        if ack.force_update {
            info!("Control plane requested a collector update");
        }
        Ok(CheckinOutcome { report, ack })
    }

    /// Current health: the built-in platform-availability check plus every
    /// caller-supplied check, run concurrently. The first failure determines
    /// the reported code, with the built-in check ordered before the
    /// callers' checks.
    pub async fn health_status(&self) -> HealthReport {
        let builtin = async {
            match self.app_service.runtime_state().await {
                Ok(RuntimeState::Running) => Ok(()),
                Ok(RuntimeState::Degraded(detail)) => {
                    Err(HealthCheckError::coded(ERROR_CODE_APP_UNAVAILABLE, detail))
                }
                Err(err) => Err(HealthCheckError::coded(
                    ERROR_CODE_APP_UNAVAILABLE,
                    err.to_string(),
                )),
            }
        };
        let customs = join_all(self.custom_checks.iter().map(|check| check.check()));
        let (builtin, customs) = tokio::join!(builtin, customs);

        for result in std::iter::once(builtin).chain(customs) {
            if let Err(err) = result {
                return HealthReport::failing(&err);
            }
        }
        HealthReport::ok()
    }

    /// One best-effort drain of the collection-stats queue.
    pub async fn queue_stats(&self) -> QueueDrain {
        self.queue.collect().await
    }

    /// Invocation statistics for the trailing window ending at `timestamp`.
    pub async fn invocation_stats(&self, timestamp: SystemTime) -> FunctionStatsList {
        self.invocations.collect(timestamp).await
    }

    /// Dead-letter count/size statistics.
    pub async fn dead_letter_stats(&self) -> Result<DeadLetterStats, StoreError> {
        self.dead_letters.stats().await
    }

    /// Reprocess one page of dead letters through `handler`.
    pub async fn process_dead_letters(
        &self,
        handler: Arc<dyn DeadLetterHandler>,
    ) -> Result<Vec<ItemOutcome>, StoreError> {
        self.dead_letters.process_all(handler).await
    }

    fn collector_body(
        &self,
        extra_fields: serde_json::Value,
        identity: Option<&CollectorIdentity>,
    ) -> serde_json::Value {
        collector_body(&self.config, extra_fields, identity)
    }
}

/// Registration/deregistration body: configuration attributes plus any
/// caller-supplied extra fields, extras winning on key collisions.
fn collector_body(
    config: &CollectorConfig,
    extra_fields: serde_json::Value,
    identity: Option<&CollectorIdentity>,
) -> serde_json::Value {
    let mut body = json!({
        "collector_type": config.collector_type,
        "version": config.version,
        "app_name": config.app_name,
        "residency": config.residency,
    });
    if let Some(map) = body.as_object_mut() {
        if let Some(account_id) = &config.account_id {
            map.insert("account_id".to_string(), json!(account_id));
        }
        if let Some(tenant_id) = &config.tenant_id {
            map.insert("tenant_id".to_string(), json!(tenant_id));
        }
        if let Some(identity) = identity {
            map.insert("host_id".to_string(), json!(identity.host_id));
            map.insert("source_id".to_string(), json!(identity.source_id));
        }
        if let Some(extra) = extra_fields.as_object() {
            for (key, value) in extra {
                map.insert(key.clone(), value.clone());
            }
        }
    }
    body
}
