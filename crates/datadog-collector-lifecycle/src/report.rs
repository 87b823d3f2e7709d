// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Check-in payload.
//!
//! Constructed fresh for every check-in and discarded after submission.

use serde::Serialize;

use datadog_collector_deadletter::DeadLetterStats;
use datadog_collector_telemetry::{FunctionStatsList, StatRecord};

use crate::health::HealthReport;

/// Dead-letter section of the check-in payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeadLetterCounts {
    pub dl_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_dl_size: Option<u64>,
}

impl From<&DeadLetterStats> for DeadLetterCounts {
    fn from(stats: &DeadLetterStats) -> Self {
        DeadLetterCounts {
            dl_count: stats.count,
            max_dl_size: stats.max_size,
        }
    }
}

/// One periodic check-in report.
#[derive(Debug, Clone, Serialize)]
pub struct CheckinReport {
    /// Collector build version.
    pub version: String,
    pub collector_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub host_id: String,
    pub source_id: String,
    pub health: HealthReport,
    /// Per-function invocation statistics for the trailing window.
    pub statistics: FunctionStatsList,
    /// Queue-reconciled collection counters, by telemetry kind.
    pub collection_stats: StatRecord,
    /// Omitted when dead-letter statistics were unavailable this cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dl_stats: Option<DeadLetterCounts>,
}

#[cfg(test)]
pub(crate) fn test_report() -> CheckinReport {
    CheckinReport {
        version: "1.0.0".to_string(),
        collector_type: "ehub".to_string(),
        account_id: Some("12345678".to_string()),
        tenant_id: None,
        host_id: "host-1".to_string(),
        source_id: "source-1".to_string(),
        health: HealthReport::ok(),
        statistics: FunctionStatsList::default(),
        collection_stats: StatRecord::default(),
        dl_stats: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datadog_collector_telemetry::FunctionStats;

    #[test]
    fn test_report_wire_shape() {
        let mut report = test_report();
        report.statistics = FunctionStatsList(vec![(
            "Collector".to_string(),
            FunctionStats::Counts {
                invocations: 10,
                errors: 1,
            },
        )]);
        report.dl_stats = Some(DeadLetterCounts {
            dl_count: 3,
            max_dl_size: Some(940),
        });

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "version": "1.0.0",
                "collector_type": "ehub",
                "account_id": "12345678",
                "host_id": "host-1",
                "source_id": "source-1",
                "health": {"status": "ok", "details": []},
                "statistics": [{"Collector": {"invocations": 10, "errors": 1}}],
                "collection_stats": {"log": {"bytes": 0, "events": 0}},
                "dl_stats": {"dl_count": 3, "max_dl_size": 940}
            })
        );
    }

    #[test]
    fn test_empty_container_omits_max_size() {
        let counts = DeadLetterCounts::from(&DeadLetterStats::default());
        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(json, serde_json::json!({"dl_count": 0}));
    }
}
