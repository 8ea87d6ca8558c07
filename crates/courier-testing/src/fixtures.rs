//! Builders for settings, pages and queued jobs.

use std::collections::HashMap;

use chrono::Utc;
use courier_core::{
    Action, CustomHeader, Job, JobId, PayloadMode, Settings, TabId, WebhookProfile,
};
use courier_delivery::context::{PageMetadata, PageSnapshot};

/// Signing secret long enough to pass settings validation.
pub const TEST_SECRET: &str = "test-secret-0123456789";

/// Settings pointing at `webhook_url` as the only profile, plain mode.
pub fn settings_for(webhook_url: impl Into<String>) -> Settings {
    Settings {
        webhook_profiles: vec![WebhookProfile::new("primary", webhook_url)],
        ..Default::default()
    }
}

/// Builder for settings snapshots.
#[derive(Debug, Clone)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Starts from [`settings_for`].
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self { settings: settings_for(webhook_url) }
    }

    /// Switches to JSON mode with `template`.
    #[must_use]
    pub fn json(mut self, template: impl Into<String>) -> Self {
        self.settings.payload_mode = PayloadMode::Json;
        self.settings.json_template = template.into();
        self
    }

    /// Signs requests with `secret`.
    #[must_use]
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.settings.hmac_secret = Some(secret.into());
        self
    }

    /// Adds a custom header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.custom_headers.push(CustomHeader { name: name.into(), value: value.into() });
        self
    }

    /// Enables every page lookup.
    #[must_use]
    pub fn with_page_details(mut self) -> Self {
        self.settings.use_canonical = true;
        self.settings.include_selection = true;
        self.settings.include_og_data = true;
        self
    }

    /// Sets the success notification flag.
    #[must_use]
    pub fn notifications(mut self, enabled: bool) -> Self {
        self.settings.show_notifications = enabled;
        self
    }

    /// Finishes the snapshot.
    pub fn build(self) -> Settings {
        self.settings
    }
}

/// Tab used by page fixtures.
pub const TEST_TAB: TabId = TabId(7);

/// A page with a title, selection, Open Graph data and a canonical link.
pub fn article_page() -> PageSnapshot {
    PageSnapshot {
        url: "https://news.example/story?id=9&utm_source=feed".to_string(),
        title: "A \"quoted\" story".to_string(),
        selection: "first line\nsecond line".to_string(),
        metadata: PageMetadata {
            og_title: "Story".to_string(),
            og_type: "article".to_string(),
            published_time: "2024-05-01T08:00:00Z".to_string(),
        },
        canonical: Some("https://news.example/story?id=9".to_string()),
    }
}

/// Builder for queued jobs.
#[derive(Debug, Clone)]
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    /// A plain-text job for `target_url` addressed to `webhook_url`.
    pub fn new(webhook_url: impl Into<String>, target_url: impl Into<String>) -> Self {
        let target_url = target_url.into();
        Self {
            job: Job {
                id: JobId::new(),
                attempt: 0,
                created_at: Utc::now(),
                body: target_url.clone(),
                headers: HashMap::from([(
                    "Content-Type".to_string(),
                    "text/plain".to_string(),
                )]),
                webhook_url: webhook_url.into(),
                dedupe_key: format!("fixture-{target_url}"),
                target_url,
                action: Action::Page,
            },
        }
    }

    /// Sets the attempt count.
    #[must_use]
    pub fn attempt(mut self, attempt: u32) -> Self {
        self.job.attempt = attempt;
        self
    }

    /// Sets the originating action.
    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.job.action = action;
        self
    }

    /// Finishes the job.
    pub fn build(self) -> Job {
        self.job
    }
}
