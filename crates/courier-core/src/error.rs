//! Error types for persistence and settings handling.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for storage and model operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Reasons a settings snapshot is rejected before it is saved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// A webhook profile URL is not an absolute http(s) URL.
    #[error("Invalid URL: {name}")]
    InvalidWebhookUrl {
        /// Name of the offending profile
        name: String,
    },

    /// Two profiles share a name (case-insensitive).
    #[error("Duplicate webhook name: {name}")]
    DuplicateName {
        /// The repeated name, lowercased
        name: String,
    },

    /// Two profiles share a URL (case-insensitive).
    #[error("Duplicate webhook URL found. Each webhook must have a unique URL.")]
    DuplicateUrl {
        /// The repeated URL, lowercased
        url: String,
    },

    /// The shared signing secret is too short.
    #[error("HMAC secret should be at least {min_len} characters for security")]
    WeakSecret {
        /// Minimum accepted length
        min_len: usize,
    },
}
