// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::app_service::AppServiceError;
use crate::backend::BackendError;

/// Errors that can occur when driving the collector lifecycle
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    AppService(#[from] AppServiceError),

    #[error("collector is not registered")]
    NotRegistered,
}
