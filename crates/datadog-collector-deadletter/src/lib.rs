// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dead-letter reclamation for serverless collectors.
//!
//! Payloads that could not be delivered to the ingestion backend are parked
//! in a well-known container under the collector's site prefix. This crate
//! lists them, hands them back to a caller-supplied handler with bounded
//! concurrency, and deletes the ones the handler accepts.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod batch;
pub mod reconciler;

pub use batch::map_bounded;
pub use reconciler::{
    DeadLetterConfig, DeadLetterHandler, DeadLetterItem, DeadLetterReconciler, DeadLetterSample,
    DeadLetterStats, DeadLetterStore, HandlerError, ItemOutcome, ProcessError, StoreError,
};
