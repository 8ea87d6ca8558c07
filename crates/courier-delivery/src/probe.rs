//! Webhook reachability checks.
//!
//! A probe POSTs a fixed `text/plain` marker body so the receiving workflow
//! can recognize and ignore it. Probes bypass dedupe, history and the queue.

use std::collections::HashMap;

use courier_core::WebhookProfile;
use serde::Serialize;
use tracing::info;

use crate::{
    client::{DeliveryClient, WebhookRequest},
    error::DeliveryError,
};

/// Body of a single probe.
pub const PROBE_BODY: &str = "test://webhook";

/// Body of each probe in a batch.
pub const BATCH_PROBE_BODY: &str = "test://webhook-batch";

const PREVIEW_CHARS: usize = 60;
const ERROR_CHARS: usize = 100;

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    /// Webhook answered 2xx.
    pub ok: bool,
    /// Response status, if any.
    pub status: Option<u16>,
    /// Human-readable summary.
    pub message: String,
}

/// Counts from probing several webhooks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProbeSummary {
    /// Probes answered with 2xx.
    pub succeeded: usize,
    /// Probes that failed in any way.
    pub failed: usize,
}

/// Sends probe requests.
#[derive(Debug, Clone)]
pub struct Prober {
    client: DeliveryClient,
}

impl Prober {
    /// Creates a prober sharing `client`'s timeout.
    pub fn new(client: DeliveryClient) -> Self {
        Self { client }
    }

    /// Probes `url` once.
    pub async fn probe(&self, url: &str) -> ProbeResult {
        match self.client.deliver(&probe_request(url, PROBE_BODY)).await {
            Ok(response) => {
                let preview: String = response.body.chars().take(PREVIEW_CHARS).collect();
                let detail = if preview.is_empty() { String::new() } else { format!(": {preview}") };
                let verdict = if response.is_success { "Success" } else { "Failed" };

                ProbeResult {
                    ok: response.is_success,
                    status: Some(response.status_code),
                    message: format!("{verdict} - HTTP {}{detail}", response.status_code),
                }
            },
            Err(DeliveryError::Timeout { timeout_seconds }) => ProbeResult {
                ok: false,
                status: None,
                message: format!("Timeout - Request took longer than {timeout_seconds} seconds"),
            },
            Err(e) => {
                let detail: String = e.to_string().chars().take(ERROR_CHARS).collect();
                ProbeResult { ok: false, status: None, message: format!("Error: {detail}") }
            },
        }
    }

    /// Probes every profile in order and counts the results.
    pub async fn probe_all(&self, profiles: &[WebhookProfile]) -> ProbeSummary {
        let mut summary = ProbeSummary::default();

        for profile in profiles {
            let ok = matches!(
                self.client.deliver(&probe_request(&profile.url, BATCH_PROBE_BODY)).await,
                Ok(response) if response.is_success
            );
            info!(profile = %profile.name, ok, "webhook probed");

            if ok {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }

        summary
    }
}

fn probe_request(url: &str, body: &str) -> WebhookRequest {
    WebhookRequest {
        url: url.to_string(),
        headers: HashMap::from([("Content-Type".to_string(), "text/plain".to_string())]),
        body: body.to_string(),
    }
}
