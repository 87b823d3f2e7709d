// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backend control-service boundary.
//!
//! [`BackendClient`] is the seam the controller composes against;
//! [`HttpBackendClient`] is the HTTP implementation and owns the transport
//! retry policy: exponential backoff for network failures and 5xx
//! responses, no retry for 4xx rejections.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::report::CheckinReport;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The control service answered with an application error.
    #[error("control service rejected {operation}: status {status}: {message}")]
    Rejected {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("control service unreachable for {operation}: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    #[error("unexpected control service response for {operation}: {message}")]
    InvalidResponse {
        operation: &'static str,
        message: String,
    },
}

/// Identity assigned by the control plane on first registration.
///
/// Persisted externally and reused for the lifetime of the collector; never
/// regenerated while both halves are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorIdentity {
    pub host_id: String,
    pub source_id: String,
}

/// Control-service endpoints discovered per residency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredEndpoints {
    /// Control service handling registration and check-in.
    pub control: String,
    /// Ingestion endpoint handed to the data plane.
    pub ingest: String,
}

/// Check-in acknowledgement from the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CheckinAck {
    /// Set when the control plane wants the collector updated to a newer
    /// build.
    #[serde(default)]
    pub force_update: bool,
}

/// Backend control service. All calls are idempotent from the caller's
/// perspective; implementations own retry/backoff.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Resolve the base URL of `service` for the given residency.
    async fn discover_endpoint(
        &self,
        service: &str,
        residency: &str,
    ) -> Result<String, BackendError>;

    async fn register(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<CollectorIdentity, BackendError>;

    async fn deregister(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<(), BackendError>;

    async fn checkin(
        &self,
        endpoint: &str,
        report: &CheckinReport,
    ) -> Result<CheckinAck, BackendError>;
}

/// Exponential backoff policy for control-plane calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retries: u32,
    pub factor: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 7,
            factor: 2,
            min_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (zero-based):
    /// `min_delay * factor^attempt`, capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = u64::from(self.factor).saturating_pow(attempt.min(32));
        let millis = (self.min_delay.as_millis() as u64)
            .saturating_mul(multiplier)
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

/// HTTP implementation of [`BackendClient`].
#[derive(Debug, Clone)]
pub struct HttpBackendClient {
    client: reqwest::Client,
    /// Discovery-service base URL.
    base_url: String,
    api_token: Option<String>,
    retry: RetryPolicy,
}

impl HttpBackendClient {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                error!("Unable to build HTTP client with timeout: {err}, using defaults");
                reqwest::Client::new()
            });
        HttpBackendClient {
            client,
            base_url: normalize_base_url(base_url.into()),
            api_token,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send_json(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, BackendError> {
        let mut attempts: u32 = 0;
        loop {
            let Some(attempt_request) = request.try_clone() else {
                return Err(BackendError::InvalidResponse {
                    operation,
                    message: "request body is not replayable".to_string(),
                });
            };
            let attempt_request = match &self.api_token {
                Some(token) => attempt_request.bearer_auth(token),
                None => attempt_request,
            };

            match attempt_request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    if status.is_success() {
                        if text.is_empty() {
                            return Ok(serde_json::Value::Null);
                        }
                        return serde_json::from_str(&text).map_err(|err| {
                            BackendError::InvalidResponse {
                                operation,
                                message: err.to_string(),
                            }
                        });
                    }
                    // 4xx is permanent: retrying cannot change the outcome.
                    let permanent = status.is_client_error();
                    if permanent || attempts >= self.retry.retries {
                        return Err(BackendError::Rejected {
                            operation,
                            status: status.as_u16(),
                            message: text,
                        });
                    }
                }
                Err(err) => {
                    if attempts >= self.retry.retries {
                        return Err(BackendError::Transport {
                            operation,
                            message: err.to_string(),
                        });
                    }
                }
            }

            let delay = self.retry.delay(attempts);
            attempts += 1;
            debug!("Retrying {operation} (attempt {attempts}) after {delay:?}");
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn discover_endpoint(
        &self,
        service: &str,
        residency: &str,
    ) -> Result<String, BackendError> {
        let url = format!(
            "{}/v1/residency/{residency}/services/{service}/endpoint",
            self.base_url
        );
        let value = self.send_json("discover_endpoint", self.client.get(url)).await?;
        match value.get("endpoint").and_then(|v| v.as_str()) {
            Some(endpoint) => Ok(normalize_base_url(endpoint.to_string())),
            None => Err(BackendError::InvalidResponse {
                operation: "discover_endpoint",
                message: "missing endpoint field".to_string(),
            }),
        }
    }

    async fn register(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<CollectorIdentity, BackendError> {
        let url = format!("{endpoint}/v1/collectors/register");
        let value = self
            .send_json("register", self.client.post(url).json(body))
            .await?;
        serde_json::from_value(value).map_err(|err| BackendError::InvalidResponse {
            operation: "register",
            message: err.to_string(),
        })
    }

    async fn deregister(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<(), BackendError> {
        let url = format!("{endpoint}/v1/collectors/deregister");
        self.send_json("deregister", self.client.post(url).json(body))
            .await?;
        Ok(())
    }

    async fn checkin(
        &self,
        endpoint: &str,
        report: &CheckinReport,
    ) -> Result<CheckinAck, BackendError> {
        let url = format!("{endpoint}/v1/collectors/checkin");
        let value = self
            .send_json("checkin", self.client.post(url).json(report))
            .await?;
        if value.is_null() {
            return Ok(CheckinAck::default());
        }
        serde_json::from_value(value).map_err(|err| BackendError::InvalidResponse {
            operation: "checkin",
            message: err.to_string(),
        })
    }
}

/// Discovery may hand back bare hosts; default them to HTTPS and strip any
/// trailing slash so path joins stay predictable.
fn normalize_base_url(url: String) -> String {
    let url = url.trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(300));
        assert_eq!(policy.delay(1), Duration::from_millis(600));
        assert_eq!(policy.delay(2), Duration::from_millis(1200));
        assert_eq!(policy.delay(5), Duration::from_millis(9600));
        assert_eq!(policy.delay(6), Duration::from_secs(10));
        assert_eq!(policy.delay(30), Duration::from_secs(10));
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("api.example.com".to_string()),
            "https://api.example.com"
        );
        assert_eq!(
            normalize_base_url("http://127.0.0.1:3333/".to_string()),
            "http://127.0.0.1:3333"
        );
        assert_eq!(
            normalize_base_url("https://api.example.com".to_string()),
            "https://api.example.com"
        );
    }

    #[tokio::test]
    async fn test_discover_endpoint_parses_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                "/v1/residency/default/services/collector_control/endpoint",
            )
            .with_status(200)
            .with_body("{\"endpoint\":\"control.example.com\"}")
            .create_async()
            .await;

        let client = HttpBackendClient::new(server.url(), None);
        let endpoint = client
            .discover_endpoint("collector_control", "default")
            .await
            .unwrap();
        assert_eq!(endpoint, "https://control.example.com");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_register_sends_token_and_parses_identity() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/collectors/register")
            .match_header("authorization", "Bearer secret-token")
            .with_status(200)
            .with_body("{\"host_id\":\"host-1\",\"source_id\":\"source-1\"}")
            .create_async()
            .await;

        let client = HttpBackendClient::new(server.url(), Some("secret-token".to_string()));
        let identity = client
            .register(&server.url(), &serde_json::json!({"collector_type": "ehub"}))
            .await
            .unwrap();
        assert_eq!(identity.host_id, "host-1");
        assert_eq!(identity.source_id, "source-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_until_budget_exhausts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/collectors/register")
            .with_status(503)
            .with_body("maintenance")
            .expect(3)
            .create_async()
            .await;

        let client = HttpBackendClient::new(server.url(), None).with_retry(RetryPolicy {
            retries: 2,
            factor: 2,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        });
        let err = client
            .register(&server.url(), &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected { status: 503, .. }));
        // Initial attempt plus two retries.
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/collectors/register")
            .with_status(403)
            .with_body("access denied")
            .expect(1)
            .create_async()
            .await;

        let client = HttpBackendClient::new(server.url(), None).with_retry(RetryPolicy {
            retries: 5,
            factor: 2,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        });
        let err = client
            .register(&server.url(), &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::Rejected {
                status: 403,
                ..
            }
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_checkin_ack_defaults() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/collectors/checkin")
            .with_status(200)
            .create_async()
            .await;

        let client = HttpBackendClient::new(server.url(), None);
        let report = crate::report::test_report();
        let ack = client.checkin(&server.url(), &report).await.unwrap();
        assert!(!ack.force_update);
    }
}
