// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Control-plane lifecycle for serverless collectors.
//!
//! Sequences registration, endpoint discovery, health checks and periodic
//! check-in against the backend control service, composing the telemetry
//! and dead-letter crates into one report per cycle.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod app_service;
pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod health;
pub mod report;

pub use app_service::{AppService, AppServiceError, PersistedSettings, RuntimeState};
pub use backend::{
    BackendClient, BackendError, CheckinAck, CollectorIdentity, DiscoveredEndpoints,
    HttpBackendClient, RetryPolicy,
};
pub use config::CollectorConfig;
pub use controller::{CheckinOutcome, CollectorController, SERVICE_CONTROL, SERVICE_INGEST};
pub use error::LifecycleError;
pub use health::{Health, HealthCheck, HealthCheckError, HealthReport};
pub use report::{CheckinReport, DeadLetterCounts};
