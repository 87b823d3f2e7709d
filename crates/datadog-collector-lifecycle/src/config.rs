// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;

use crate::backend::CollectorIdentity;
use crate::error::LifecycleError;

const DEFAULT_RESIDENCY: &str = "default";

/// Configuration for a collector instance.
///
/// Built once (usually from the environment) and passed into components at
/// construction; components never read the process environment themselves.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Collector type tag sent to the control plane (e.g. "ehub", "o365").
    pub collector_type: String,
    /// Collector build version reported on registration and check-in.
    pub version: String,
    /// Deployed application name; also the dead-letter site prefix.
    pub app_name: String,
    /// Data-residency selector used for endpoint discovery.
    pub residency: String,
    /// Account identifier included in check-in reports.
    pub account_id: Option<String>,
    /// Tenant identifier included in check-in reports.
    pub tenant_id: Option<String>,
    /// Function names tracked by invocation statistics.
    pub functions: Vec<String>,
    /// Identity pre-assigned through configuration, adopted without a
    /// registration call.
    pub host_id: Option<String>,
    pub source_id: Option<String>,
    /// Base endpoint of the control-plane discovery service.
    pub api_endpoint: String,
    /// Bearer token for control-plane calls; acquisition is external.
    pub api_token: Option<String>,
}

impl CollectorConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, LifecycleError> {
        let config = Self {
            collector_type: env::var("COLLECTOR_TYPE").unwrap_or_default(),
            version: env::var("COLLECTOR_VERSION").unwrap_or_default(),
            app_name: env::var("COLLECTOR_APP_NAME").unwrap_or_default(),
            residency: env::var("COLLECTOR_RESIDENCY")
                .unwrap_or_else(|_| DEFAULT_RESIDENCY.to_string()),
            account_id: env::var("COLLECTOR_ACCOUNT_ID").ok(),
            tenant_id: env::var("COLLECTOR_TENANT_ID").ok(),
            functions: env::var("COLLECTOR_FUNCTIONS")
                .map(|val| {
                    val.split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            host_id: env::var("COLLECTOR_HOST_ID").ok(),
            source_id: env::var("COLLECTOR_SOURCE_ID").ok(),
            api_endpoint: env::var("COLLECTOR_API_ENDPOINT").unwrap_or_default(),
            api_token: env::var("COLLECTOR_API_TOKEN").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.collector_type.trim().is_empty() {
            return Err(LifecycleError::InvalidConfig(
                "COLLECTOR_TYPE cannot be empty".to_string(),
            ));
        }
        if self.version.trim().is_empty() {
            return Err(LifecycleError::InvalidConfig(
                "COLLECTOR_VERSION cannot be empty".to_string(),
            ));
        }
        if self.app_name.trim().is_empty() {
            return Err(LifecycleError::InvalidConfig(
                "COLLECTOR_APP_NAME cannot be empty".to_string(),
            ));
        }
        if self.api_endpoint.trim().is_empty() {
            return Err(LifecycleError::InvalidConfig(
                "COLLECTOR_API_ENDPOINT cannot be empty".to_string(),
            ));
        }
        if self.residency.trim().is_empty() {
            return Err(LifecycleError::InvalidConfig(
                "COLLECTOR_RESIDENCY cannot be empty".to_string(),
            ));
        }
        // An identity is adopted only as a complete pair; a lone half would
        // shadow the registration flow without being usable.
        if self.host_id.is_some() != self.source_id.is_some() {
            return Err(LifecycleError::InvalidConfig(
                "COLLECTOR_HOST_ID and COLLECTOR_SOURCE_ID must be set together".to_string(),
            ));
        }
        Ok(())
    }

    /// Identity pre-assigned through configuration, when complete.
    pub fn identity(&self) -> Option<CollectorIdentity> {
        match (&self.host_id, &self.source_id) {
            (Some(host_id), Some(source_id)) => Some(CollectorIdentity {
                host_id: host_id.clone(),
                source_id: source_id.clone(),
            }),
            _ => None,
        }
    }
}
