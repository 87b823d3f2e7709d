// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collector health checks.

use async_trait::async_trait;
use serde::Serialize;

/// Code reported for failures that carry no structured code of their own.
pub const ERROR_CODE_GENERIC: &str = "COL000001";

/// Code reported when the hosting platform says the application is down.
pub const ERROR_CODE_APP_UNAVAILABLE: &str = "COL000002";

/// A health-check failure: either a structured error with a stable
/// machine-readable code, or a raw message from a custom check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthCheckError {
    #[error("{message}")]
    Coded { code: String, message: String },

    #[error("{0}")]
    Message(String),
}

impl HealthCheckError {
    pub fn coded(code: impl Into<String>, message: impl Into<String>) -> Self {
        HealthCheckError::Coded {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            HealthCheckError::Coded { code, .. } => code,
            HealthCheckError::Message(_) => ERROR_CODE_GENERIC,
        }
    }
}

/// Caller-supplied health check, run alongside the built-in platform check.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<(), HealthCheckError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Ok,
    Error,
}

/// Health section of the check-in report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: Health,
    pub details: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl HealthReport {
    pub fn ok() -> Self {
        HealthReport {
            status: Health::Ok,
            details: Vec::new(),
            error_code: None,
        }
    }

    /// Report for the first failing check.
    pub fn failing(err: &HealthCheckError) -> Self {
        HealthReport {
            status: Health::Error,
            details: vec![err.to_string()],
            error_code: Some(err.code().to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Health::Ok
    }
}
