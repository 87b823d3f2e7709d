// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hosting-platform collaborator.
//!
//! The platform persists collector settings across restarts (identity and
//! discovered endpoints) and answers whether the hosting application is
//! currently able to run the collector's functions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::{CollectorIdentity, DiscoveredEndpoints};

#[derive(Debug, thiserror::Error)]
pub enum AppServiceError {
    #[error("app service unavailable: {0}")]
    Unavailable(String),

    #[error("failed to persist settings: {0}")]
    Persist(String),
}

/// Runtime state of the hosting application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeState {
    Running,
    /// Not serving; the detail feeds the health report.
    Degraded(String),
}

/// Settings persisted with the hosting platform, surviving restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<CollectorIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<DiscoveredEndpoints>,
}

/// Persisted settings store plus runtime-availability probe.
#[async_trait]
pub trait AppService: Send + Sync {
    /// Current state of the hosting application.
    async fn runtime_state(&self) -> Result<RuntimeState, AppServiceError>;

    async fn load_settings(&self) -> Result<PersistedSettings, AppServiceError>;

    /// Merge the present fields of `patch` into the stored settings,
    /// leaving absent fields untouched.
    async fn update_settings(&self, patch: &PersistedSettings) -> Result<(), AppServiceError>;
}

impl PersistedSettings {
    /// Merge another patch into this one, newer fields winning.
    pub fn merged_with(&self, patch: &PersistedSettings) -> PersistedSettings {
        PersistedSettings {
            identity: patch.identity.clone().or_else(|| self.identity.clone()),
            endpoints: patch.endpoints.clone().or_else(|| self.endpoints.clone()),
        }
    }
}
