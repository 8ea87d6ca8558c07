//! User settings snapshot read by the dispatcher on every send.
//!
//! The dispatcher never writes settings; the snapshot is loaded per call so
//! edits take effect on the next trigger without restarting anything.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::SettingsError;

/// Template used when JSON mode is selected without a custom template.
pub const DEFAULT_JSON_TEMPLATE: &str = r#"{"url":"{{url}}","title":"{{title}}","ts":"{{isoTimestamp}}","selection":"{{selection}}","source":"{{source}}"}"#;

/// Minimum accepted length of the signing secret.
pub const MIN_SECRET_LEN: usize = 16;

/// How the request body is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    /// Body is the bare canonical URL, sent as `text/plain`.
    #[default]
    Plain,
    /// Body is the rendered JSON template, sent as `application/json`.
    Json,
}

/// Extra header added to every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomHeader {
    /// Header name. Headers with an empty name are skipped.
    pub name: String,
    /// Header value.
    #[serde(default)]
    pub value: String,
}

/// A named webhook destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookProfile {
    /// Stable profile identifier.
    pub id: String,
    /// Display name, unique case-insensitively.
    pub name: String,
    /// Destination URL, unique case-insensitively.
    pub url: String,
}

impl WebhookProfile {
    /// Creates a profile with a fresh identifier.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4().to_string(), name: name.into(), url: url.into() }
    }
}

/// Complete settings snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Legacy single destination, used when no profile is configured.
    pub webhook_url: Option<String>,
    /// Named destinations; the first one is the default.
    pub webhook_profiles: Vec<WebhookProfile>,
    /// Body format.
    pub payload_mode: PayloadMode,
    /// Template rendered in JSON mode.
    pub json_template: String,
    /// Extra headers.
    pub custom_headers: Vec<CustomHeader>,
    /// Shared secret for `X-Signature`; `None` or empty disables signing.
    pub hmac_secret: Option<String>,
    /// Prefer the page-declared canonical URL.
    pub use_canonical: bool,
    /// Include the page selection in the payload.
    pub include_selection: bool,
    /// Include Open Graph metadata in the payload.
    pub include_og_data: bool,
    /// Emit a notification after a successful send.
    pub show_notifications: bool,
    /// Query parameter strip patterns; a trailing `*` matches by prefix.
    pub strip_params: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_profiles: Vec::new(),
            payload_mode: PayloadMode::Plain,
            json_template: DEFAULT_JSON_TEMPLATE.to_string(),
            custom_headers: Vec::new(),
            hmac_secret: None,
            use_canonical: false,
            include_selection: false,
            include_og_data: false,
            show_notifications: true,
            strip_params: vec!["utm_*".to_string(), "fbclid".to_string(), "gclid".to_string()],
        }
    }
}

impl Settings {
    /// Resolves the destination: explicit override, else the first profile,
    /// else the legacy URL. Blank values are ignored at every step.
    pub fn resolve_webhook(&self, override_url: Option<&str>) -> Option<String> {
        override_url
            .filter(|url| !url.trim().is_empty())
            .map(str::to_string)
            .or_else(|| {
                self.webhook_profiles
                    .first()
                    .map(|profile| profile.url.clone())
                    .filter(|url| !url.trim().is_empty())
            })
            .or_else(|| self.webhook_url.clone().filter(|url| !url.trim().is_empty()))
    }

    /// Signing secret, if one is configured.
    pub fn signing_secret(&self) -> Option<&str> {
        self.hmac_secret.as_deref().filter(|secret| !secret.is_empty())
    }

    /// Template to render in JSON mode, falling back to the default when the
    /// configured one is blank.
    pub fn template(&self) -> &str {
        if self.json_template.trim().is_empty() {
            DEFAULT_JSON_TEMPLATE
        } else {
            &self.json_template
        }
    }

    /// Checks the snapshot before it is saved.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: an invalid profile URL, a duplicate
    /// profile name or URL, or a signing secret shorter than
    /// [`MIN_SECRET_LEN`].
    pub fn validate(&self) -> Result<(), SettingsError> {
        for profile in &self.webhook_profiles {
            if !is_valid_webhook_url(&profile.url) {
                return Err(SettingsError::InvalidWebhookUrl { name: profile.name.clone() });
            }
        }

        let mut names = HashSet::new();
        for profile in &self.webhook_profiles {
            let name = profile.name.to_lowercase();
            if !names.insert(name.clone()) {
                return Err(SettingsError::DuplicateName { name });
            }
        }

        let mut urls = HashSet::new();
        for profile in &self.webhook_profiles {
            let url = profile.url.to_lowercase();
            if !urls.insert(url.clone()) {
                return Err(SettingsError::DuplicateUrl { url });
            }
        }

        if let Some(secret) = self.hmac_secret.as_deref().map(str::trim) {
            if !secret.is_empty() && secret.len() < MIN_SECRET_LEN {
                return Err(SettingsError::WeakSecret { min_len: MIN_SECRET_LEN });
            }
        }

        Ok(())
    }
}

/// Returns true for absolute `http` or `https` URLs.
pub fn is_valid_webhook_url(url: &str) -> bool {
    Url::parse(url).is_ok_and(|parsed| matches!(parsed.scheme(), "http" | "https"))
}
