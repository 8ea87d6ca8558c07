//! Error types for webhook dispatch.
//!
//! Every failure a dispatch or retry can end in is a variant here. Variants
//! carry enough context for logs, while [`DeliveryError::user_message`]
//! yields the text recorded in history and shown to the user.

use std::fmt;

use courier_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Longest slice of a transport error kept in user-facing messages.
const MAX_DETAIL_CHARS: usize = 100;

/// Failure outcomes of a dispatch or retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// No override, profile or legacy webhook URL is configured.
    #[error("no webhook configured")]
    NoWebhookConfigured,

    /// A trigger needed the active tab and there is none.
    #[error("no active tab")]
    NoActiveTab,

    /// Target URL is empty or uses a blocked scheme.
    #[error("blocked target url: {url:?}")]
    BlockedTarget {
        /// The rejected target
        url: String,
    },

    /// Same request was sent inside the dedupe window.
    #[error("duplicate suppressed")]
    DuplicateSuppressed,

    /// Connection could not be established.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Transport error message
        message: String,
    },

    /// Request failed after connecting (reset, protocol error, body error).
    #[error("connection failed: {message}")]
    ConnectionFailed {
        /// Transport error message
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// HTTP response indicated a client error other than 429.
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
    },

    /// HTTP 429.
    #[error("rate limited: HTTP 429")]
    RateLimited,

    /// HTTP response indicated server error (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
    },

    /// Any other non-2xx status (1xx, 3xx, 6xx and up).
    #[error("unexpected status: HTTP {status_code}")]
    UnexpectedStatus {
        /// HTTP status code
        status_code: u16,
    },

    /// Retry queue is at capacity.
    #[error("queue full ({capacity} items)")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    /// Retry budget for a queued job is spent.
    #[error("delivery failed after {attempts} attempts")]
    RetriesExhausted {
        /// Retry attempts performed
        attempts: u32,
    },

    /// Persistent store failed.
    #[error("storage error: {message}")]
    Storage {
        /// Storage error message
        message: String,
    },

    /// Invalid client or engine configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a post-connect transport error from a message.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a blocked target error.
    pub fn blocked(url: impl Into<String>) -> Self {
        Self::BlockedTarget { url: url.into() }
    }

    /// Classifies a non-2xx response status.
    ///
    /// Returns `None` for 2xx statuses.
    pub fn from_status(status_code: u16) -> Option<Self> {
        match status_code {
            200..=299 => None,
            429 => Some(Self::RateLimited),
            400..=499 => Some(Self::ClientError { status_code }),
            500..=599 => Some(Self::ServerError { status_code }),
            _ => Some(Self::UnexpectedStatus { status_code }),
        }
    }

    /// Determines if this error represents a temporary failure that should be
    /// retried through the queue.
    ///
    /// Returns `true` for 429, 5xx, network failures and timeouts.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. }
            | Self::ConnectionFailed { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::RateLimited => true,

            Self::NoWebhookConfigured
            | Self::NoActiveTab
            | Self::BlockedTarget { .. }
            | Self::DuplicateSuppressed
            | Self::ClientError { .. }
            | Self::UnexpectedStatus { .. }
            | Self::QueueFull { .. }
            | Self::RetriesExhausted { .. }
            | Self::Storage { .. }
            | Self::Configuration { .. } => false,
        }
    }

    /// HTTP status carried by the error, if the webhook responded.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientError { status_code }
            | Self::ServerError { status_code }
            | Self::UnexpectedStatus { status_code } => Some(*status_code),
            Self::RateLimited => Some(429),
            _ => None,
        }
    }

    /// Message recorded in history and surfaced to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoWebhookConfigured => "No webhook configured".to_string(),
            Self::NoActiveTab => "No tab is currently active".to_string(),
            Self::BlockedTarget { .. } => "Cannot send chrome:// or extension URLs".to_string(),
            Self::DuplicateSuppressed => "URL already sent in last 60s".to_string(),
            Self::NetworkError { .. } => {
                "Network error. Check your internet connection. Will retry.".to_string()
            },
            Self::ConnectionFailed { message } => {
                let detail: String = message.chars().take(MAX_DETAIL_CHARS).collect();
                format!("Connection failed: {detail}")
            },
            Self::Timeout { timeout_seconds } => {
                format!("Request timed out after {timeout_seconds} seconds. Will retry.")
            },
            Self::ClientError { status_code: 404 } => {
                "Webhook not found (HTTP 404). Check your webhook URL.".to_string()
            },
            Self::ClientError { status_code: status_code @ (401 | 403) } => {
                format!("Webhook authentication failed (HTTP {status_code}). Check your credentials.")
            },
            Self::RateLimited => "Rate limited (HTTP 429). Will retry automatically.".to_string(),
            Self::ServerError { status_code } => {
                format!("Webhook server error (HTTP {status_code}). Will retry automatically.")
            },
            Self::ClientError { status_code } | Self::UnexpectedStatus { status_code } => {
                format!("Webhook returned HTTP {status_code}")
            },
            Self::QueueFull { capacity } => format!(
                "Queue is full ({capacity} items max). Please clear queue or wait for retries to complete."
            ),
            Self::RetriesExhausted { attempts } => {
                format!("Failed permanently after {attempts} retry attempts")
            },
            Self::Storage { message } => format!("Storage error: {message}"),
            Self::Configuration { message } => format!("Configuration error: {message}"),
        }
    }

    /// Coarse classification for logs.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from(self)
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        Self::storage(err.to_string())
    }
}

/// Category of a delivery error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or invalid configuration.
    Configuration,
    /// Target rejected before sending.
    Validation,
    /// Suppressed as a recent duplicate.
    Duplicate,
    /// 4xx other than 429, or any other non-2xx.
    Client,
    /// 429, 5xx, network failure or timeout.
    Transient,
    /// Queue has no room.
    Capacity,
    /// Retry budget spent.
    Permanent,
    /// Persistent store failure.
    Storage,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NoWebhookConfigured | DeliveryError::Configuration { .. } => {
                Self::Configuration
            },
            DeliveryError::BlockedTarget { .. } | DeliveryError::NoActiveTab => Self::Validation,
            DeliveryError::DuplicateSuppressed => Self::Duplicate,
            DeliveryError::ClientError { .. } | DeliveryError::UnexpectedStatus { .. } => {
                Self::Client
            },
            DeliveryError::NetworkError { .. }
            | DeliveryError::ConnectionFailed { .. }
            | DeliveryError::Timeout { .. }
            | DeliveryError::RateLimited
            | DeliveryError::ServerError { .. } => Self::Transient,
            DeliveryError::QueueFull { .. } => Self::Capacity,
            DeliveryError::RetriesExhausted { .. } => Self::Permanent,
            DeliveryError::Storage { .. } => Self::Storage,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Validation => write!(f, "validation"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::Client => write!(f, "client"),
            Self::Transient => write!(f, "transient"),
            Self::Capacity => write!(f, "capacity"),
            Self::Permanent => write!(f, "permanent"),
            Self::Storage => write!(f, "storage"),
        }
    }
}
