// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-concurrency fan-out/fan-in.

use std::future::Future;

use futures::stream::{self, StreamExt};

/// Runs `op` over `items` with at most `limit` operations in flight.
///
/// Outputs are returned in input order. Failures must be carried in the
/// output type: one item failing never aborts the remaining items. `op`
/// receives each item's input position alongside the item.
pub async fn map_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, op: F) -> Vec<R>
where
    F: Fn(usize, T) -> Fut,
    Fut: Future<Output = R>,
{
    stream::iter(
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| op(index, item)),
    )
    .buffered(limit.max(1))
    .collect()
    .await
}
