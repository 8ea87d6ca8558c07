//! Core domain models and strongly-typed identifiers.
//!
//! Defines the persisted retry job, the history record written for every
//! dispatch outcome, and the identifiers that flow between the trigger
//! surface and the delivery engine.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of jobs the retry queue holds.
pub const QUEUE_CAPACITY: usize = 50;

/// Maximum number of history entries kept, newest first.
pub const HISTORY_LIMIT: usize = 50;

/// Persisted dedupe table: dedupe key to last-seen epoch milliseconds.
pub type DedupeTable = HashMap<String, i64>;

/// Strongly-typed job identifier.
///
/// Opaque token assigned when a failed send is queued. It follows the job
/// through every retry until the job is removed.
///
/// # Example
///
/// ```
/// use courier_core::models::JobId;
/// let job_id = JobId::new();
/// println!("queued job {job_id}");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier of a browser tab (or any page handle) known to the page
/// context provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provenance tag recorded on jobs and history entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Page context menu.
    Page,
    /// Link context menu or programmatic link send.
    Link,
    /// Keyboard shortcut.
    Shortcut,
    /// Explicit "send active tab" request.
    Click,
    /// Queue processor retry.
    Retry,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page => write!(f, "page"),
            Self::Link => write!(f, "link"),
            Self::Shortcut => write!(f, "shortcut"),
            Self::Click => write!(f, "click"),
            Self::Retry => write!(f, "retry"),
        }
    }
}

/// One queued delivery awaiting retry.
///
/// Carries the fully built request so a retry sends exactly the bytes and
/// headers of the original attempt, including its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Retries performed so far. Starts at 0.
    pub attempt: u32,
    /// When the job was queued.
    pub created_at: DateTime<Utc>,
    /// Serialized request body.
    pub body: String,
    /// Request headers as built for the original attempt.
    pub headers: HashMap<String, String>,
    /// Destination webhook.
    pub webhook_url: String,
    /// Fingerprint of method, destination and body.
    pub dedupe_key: String,
    /// Canonicalized source URL, for display.
    pub target_url: String,
    /// Trigger that produced the job.
    pub action: Action,
}

impl Job {
    /// Summary of the request this job sends.
    pub fn request_summary(&self) -> RequestSummary {
        RequestSummary::post(self.headers.clone(), self.body.len())
    }
}

/// Method, headers and size of a request, recorded in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSummary {
    /// HTTP method.
    pub method: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Body size in bytes.
    pub size: usize,
}

impl RequestSummary {
    /// Summary of a POST request.
    pub fn post(headers: HashMap<String, String>, size: usize) -> Self {
        Self { method: "POST".to_string(), headers, size }
    }

    /// Summary for outcomes decided before a request was built.
    pub fn empty() -> Self {
        Self::post(HashMap::new(), 0)
    }
}

/// One entry in the delivery history log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Unique entry identifier.
    pub id: Uuid,
    /// When the outcome was recorded.
    pub timestamp: DateTime<Utc>,
    /// Trigger that produced the outcome.
    pub action: Action,
    /// Source URL (canonicalized when available).
    pub target_url: String,
    /// HTTP status if the webhook responded.
    pub http_status: Option<u16>,
    /// Final user-facing error message, if any.
    pub error: Option<String>,
    /// What was sent.
    pub request_summary: RequestSummary,
}

impl HistoryEntry {
    /// Starts a history entry with no status, no error and an empty request
    /// summary.
    pub fn new(timestamp: DateTime<Utc>, action: Action, target_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            action,
            target_url: target_url.into(),
            http_status: None,
            error: None,
            request_summary: RequestSummary::empty(),
        }
    }

    /// Sets the HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: Option<u16>) -> Self {
        self.http_status = status;
        self
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    /// Sets the request summary.
    #[must_use]
    pub fn with_summary(mut self, summary: RequestSummary) -> Self {
        self.request_summary = summary;
        self
    }

    /// Whether this entry records a successful delivery.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.http_status.is_some_and(|s| (200..300).contains(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Action::Shortcut).unwrap(), "\"shortcut\"");
        assert_eq!(serde_json::from_str::<Action>("\"retry\"").unwrap(), Action::Retry);
        assert_eq!(Action::Link.to_string(), "link");
    }

    #[test]
    fn job_round_trips_through_camel_case_json() {
        let job = Job {
            id: JobId::new(),
            attempt: 2,
            created_at: Utc::now(),
            body: "https://example.com/".to_string(),
            headers: HashMap::from([("Content-Type".to_string(), "text/plain".to_string())]),
            webhook_url: "https://hooks.example.com/in".to_string(),
            dedupe_key: "abc".to_string(),
            target_url: "https://example.com/".to_string(),
            action: Action::Page,
        };

        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("webhookUrl").is_some());
        assert!(json.get("dedupeKey").is_some());

        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn history_entry_success_requires_2xx_and_no_error() {
        let base = HistoryEntry::new(Utc::now(), Action::Click, "https://example.com/");
        assert!(!base.is_success());
        assert!(base.clone().with_status(Some(204)).is_success());
        assert!(!base.clone().with_status(Some(503)).is_success());
        assert!(!base.with_status(Some(200)).with_error(Some("boom".to_string())).is_success());
    }

    #[test]
    fn request_summary_size_is_body_bytes() {
        let job = Job {
            id: JobId::new(),
            attempt: 0,
            created_at: Utc::now(),
            body: "héllo".to_string(),
            headers: HashMap::new(),
            webhook_url: String::new(),
            dedupe_key: String::new(),
            target_url: String::new(),
            action: Action::Retry,
        };
        assert_eq!(job.request_summary().size, 6);
        assert_eq!(job.request_summary().method, "POST");
    }
}
