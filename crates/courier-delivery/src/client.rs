//! HTTP client for webhook delivery with a bounded request timeout.
//!
//! The client only sends and reports. It returns `Ok` for every response the
//! webhook produced, whatever the status, and `Err` only for transport
//! failures. Classifying statuses is the caller's job.

use std::{collections::HashMap, time::Duration};

use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout covering connect, send and response.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: concat!("courier/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 3,
        }
    }
}

/// A fully built webhook POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    /// Destination URL.
    pub url: String,
    /// Headers to send, including `Content-Type`.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: String,
}

/// Response from a webhook delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body (limited size).
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
    /// Whether the request was successful (2xx status).
    pub is_success: bool,
}

impl DeliveryResponse {
    /// Classified failure for a non-2xx response.
    pub fn error(&self) -> Option<DeliveryError> {
        DeliveryError::from_status(self.status_code)
    }
}

/// HTTP client for webhook POSTs.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built from the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// POSTs `request` and returns whatever the webhook answered.
    ///
    /// # Errors
    ///
    /// - `Timeout` when the configured timeout elapses
    /// - `NetworkError` when no connection could be made
    /// - `ConnectionFailed` for any other transport failure
    pub async fn deliver(&self, request: &WebhookRequest) -> Result<DeliveryResponse> {
        let start_time = std::time::Instant::now();

        let span = info_span!(
            "webhook_delivery",
            url = %request.url,
            body_bytes = request.body.len(),
        );

        async move {
            tracing::debug!("sending webhook");

            let mut http_request = self.client.post(&request.url).body(request.body.clone());

            for (key, value) in &request.headers {
                if !is_managed_header(key) {
                    http_request = http_request.header(key, value);
                }
            }

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {}", e);

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(e.to_string()));
                    }
                    return Err(DeliveryError::connection(e.to_string()));
                },
            };

            let duration = start_time.elapsed();
            let delivery_response = parse_response(response, duration).await;

            match delivery_response.status_code {
                200..=299 => {
                    tracing::info!(
                        status = delivery_response.status_code,
                        duration_ms = duration.as_millis(),
                        "webhook delivered"
                    );
                },
                status => {
                    tracing::warn!(
                        status,
                        duration_ms = duration.as_millis(),
                        "webhook rejected delivery"
                    );
                },
            }

            Ok(delivery_response)
        }
        .instrument(span)
        .await
    }
}

/// Reads an HTTP response into a delivery response, truncating large bodies.
async fn parse_response(response: Response, duration: Duration) -> DeliveryResponse {
    const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;
    const TRUNCATED_SIZE: usize = 1024;

    let status_code = response.status().as_u16();
    let is_success = response.status().is_success();

    let body = match response.bytes().await {
        Ok(bytes) if bytes.len() > MAX_RESPONSE_BODY_SIZE => {
            let suffix = "... (truncated)";
            let truncated = String::from_utf8_lossy(&bytes[..TRUNCATED_SIZE - suffix.len()]);
            format!("{truncated}{suffix}")
        },
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!("failed to read response body: {}", e);
            String::new()
        },
    };

    DeliveryResponse { status_code, body, duration, is_success }
}

/// Hop-by-hop and transport headers the client sets itself.
fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.to_lowercase();
    matches!(
        lowercase.as_str(),
        "content-length"
            | "host"
            | "user-agent"
            | "connection"
            | "keep-alive"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request(url: String) -> WebhookRequest {
        WebhookRequest {
            url,
            headers: HashMap::from([
                ("Content-Type".to_string(), "text/plain".to_string()),
                ("X-Custom".to_string(), "custom-value".to_string()),
                ("Host".to_string(), "evil.example".to_string()),
            ]),
            body: "https://example.com/article".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_delivery() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::header("Content-Type", "text/plain"))
            .and(matchers::header("X-Custom", "custom-value"))
            .and(matchers::body_string("https://example.com/article"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let response = client.deliver(&request(format!("{}/hook", mock_server.uri()))).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert!(response.is_success);
        assert_eq!(response.body, "OK");
        assert!(response.error().is_none());
    }

    #[tokio::test]
    async fn error_statuses_are_returned_not_raised() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let response = client.deliver(&request(mock_server.uri())).await.unwrap();

        assert_eq!(response.status_code, 503);
        assert!(!response.is_success);
        assert_eq!(response.error(), Some(DeliveryError::ServerError { status_code: 503 }));
    }

    #[tokio::test]
    async fn slow_webhook_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::new(ClientConfig {
            timeout: Duration::from_millis(100),
            ..Default::default()
        })
        .unwrap();

        let err = client.deliver(&request(mock_server.uri())).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn duration_covers_webhook_latency() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_millis(200)))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let response = client.deliver(&request(mock_server.uri())).await.unwrap();

        assert_eq!(response.status_code, 202);
        assert!(response.duration >= Duration::from_millis(200));
        assert!(response.duration < client.timeout());
    }

    #[tokio::test]
    async fn refused_connection_is_retryable() {
        let client = DeliveryClient::with_defaults().unwrap();
        let err = client.deliver(&request("http://127.0.0.1:1/hook".to_string())).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn managed_headers_identified() {
        assert!(is_managed_header("Content-Length"));
        assert!(is_managed_header("host"));
        assert!(is_managed_header("USER-AGENT"));

        assert!(!is_managed_header("Content-Type"));
        assert!(!is_managed_header("X-Signature"));
        assert!(!is_managed_header("Authorization"));
    }
}
