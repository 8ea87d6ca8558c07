//! Send-or-enqueue dispatch.
//!
//! The dispatcher turns a target URL into a delivered webhook, a queued
//! retry, or a recorded failure. It owns the inline send only; once a job is
//! queued the processor takes over. Every call that reaches the settings
//! snapshot produces exactly one history entry.

use std::{future::Future, sync::Arc, time::Duration};

use courier_core::{Action, Clock, HistoryEntry, Job, JobId, RequestSummary, Settings, TabId};
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

use crate::{
    canonical::canonicalize,
    client::{DeliveryClient, WebhookRequest},
    context::{ContextError, PageContext, PageMetadata, SideEffects},
    dedupe::{dedupe_key, DedupCache},
    error::{DeliveryError, Result},
    processor::RetryScheduler,
    queue::JobQueue,
    request::{build_request, RequestInput},
    retry::RetryPolicy,
    storage::{HistorySink, SettingsSource},
};

/// History message for a suppressed duplicate.
pub const DUPLICATE_HISTORY_MESSAGE: &str = "Already sent recently (duplicate blocked)";

/// Notification title after a successful send.
pub const SUCCESS_NOTIFICATION_TITLE: &str = "URL Sent";

/// URL schemes rejected by default.
pub fn default_blocked_schemes() -> Vec<String> {
    vec!["chrome".to_string(), "chrome-extension".to_string()]
}

/// One send request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    /// Trigger that produced the send.
    pub action: Action,
    /// URL to deliver.
    pub target_url: String,
    /// Tab the URL came from, for page lookups.
    pub tab_id: Option<TabId>,
    /// Destination overriding the configured one.
    pub webhook_override: Option<String>,
    /// Skip duplicate suppression.
    pub force_send: bool,
}

impl SendRequest {
    /// A plain send of `target_url` with no tab, override or force.
    pub fn new(action: Action, target_url: impl Into<String>) -> Self {
        Self {
            action,
            target_url: target_url.into(),
            tab_id: None,
            webhook_override: None,
            force_send: false,
        }
    }

    /// Sets the source tab.
    #[must_use]
    pub fn with_tab(mut self, tab_id: TabId) -> Self {
        self.tab_id = Some(tab_id);
        self
    }

    /// Sets the destination override.
    #[must_use]
    pub fn with_webhook(mut self, webhook_url: impl Into<String>) -> Self {
        self.webhook_override = Some(webhook_url.into());
        self
    }

    /// Sets the force-send flag.
    #[must_use]
    pub fn forced(mut self, force_send: bool) -> Self {
        self.force_send = force_send;
        self
    }
}

/// What happened to a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// The webhook accepted the request with a 2xx.
    pub ok: bool,
    /// HTTP status, if the webhook responded.
    pub status: Option<u16>,
    /// Failure, if any.
    pub error: Option<DeliveryError>,
    /// The send was suppressed as a duplicate and may be forced.
    pub can_retry: bool,
    /// Delay of the processor pass scheduled for the queued job.
    pub retry_in: Option<Duration>,
}

impl DispatchOutcome {
    fn delivered(status: Option<u16>) -> Self {
        Self { ok: true, status, error: None, can_retry: false, retry_in: None }
    }

    pub(crate) fn failed(status: Option<u16>, error: DeliveryError) -> Self {
        let can_retry = matches!(error, DeliveryError::DuplicateSuppressed);
        Self { ok: false, status, error: Some(error), can_retry, retry_in: None }
    }

    /// User-facing error message, if the send failed.
    pub fn message(&self) -> Option<String> {
        self.error.as_ref().map(DeliveryError::user_message)
    }
}

/// Dispatcher tunables.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Schemes rejected as browser-internal, compared case-insensitively.
    pub blocked_schemes: Vec<String>,
    /// Policy whose attempt-0 delay is used for the first retry.
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { blocked_schemes: default_blocked_schemes(), retry: RetryPolicy::default() }
    }
}

/// Ports the dispatcher talks to.
#[derive(Clone)]
pub struct DispatchPorts {
    /// Settings snapshot source.
    pub settings: Arc<dyn SettingsSource>,
    /// Page lookups.
    pub page: Arc<dyn PageContext>,
    /// Clipboard and notifications.
    pub effects: Arc<dyn SideEffects>,
    /// History log.
    pub history: Arc<dyn HistorySink>,
}

/// Decides between inline delivery and queueing.
pub struct Dispatcher {
    ports: DispatchPorts,
    client: DeliveryClient,
    dedupe: Arc<DedupCache>,
    queue: Arc<JobQueue>,
    scheduler: Arc<dyn RetryScheduler>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(
        ports: DispatchPorts,
        client: DeliveryClient,
        dedupe: Arc<DedupCache>,
        queue: Arc<JobQueue>,
        scheduler: Arc<dyn RetryScheduler>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self { ports, client, dedupe, queue, scheduler, clock, config }
    }

    /// Sends `request.target_url` to the resolved webhook, queueing it for
    /// retry on a transient failure.
    ///
    /// Failures of the send itself are reported in the outcome, never as
    /// `Err`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the settings, dedupe table or
    /// queue cannot be read or written.
    pub async fn send_or_enqueue(&self, request: SendRequest) -> Result<DispatchOutcome> {
        let span = info_span!(
            "dispatch",
            action = %request.action,
            target = %request.target_url,
            forced = request.force_send,
        );

        self.dispatch(request).instrument(span).await
    }

    async fn dispatch(&self, request: SendRequest) -> Result<DispatchOutcome> {
        let settings = self.ports.settings.snapshot().await?;

        let Some(webhook_url) = settings.resolve_webhook(request.webhook_override.as_deref())
        else {
            return Ok(self.reject(&request, DeliveryError::NoWebhookConfigured).await);
        };

        if self.is_blocked(&request.target_url) {
            let error = DeliveryError::blocked(request.target_url.clone());
            return Ok(self.reject(&request, error).await);
        }

        let canonical_link = match request.tab_id {
            Some(tab) if settings.use_canonical => {
                best_effort("canonical link", self.ports.page.canonical_link(tab)).await.flatten()
            },
            _ => None,
        };
        let target_url =
            canonicalize(&request.target_url, &settings.strip_params, canonical_link.as_deref());

        let page = self.gather_page(request.tab_id, &settings).await;
        let built = build_request(
            &RequestInput {
                base_url: &target_url,
                title: &page.title,
                selection: Some(&page.selection),
                page_metadata: Some(&page.metadata),
            },
            &settings,
            self.clock.now_utc(),
            Uuid::new_v4(),
        )?;
        let summary = RequestSummary::post(built.headers.clone(), built.body.len());
        let key = dedupe_key(&webhook_url, &built.body);

        if !request.force_send && self.dedupe.should_suppress(&key).await? {
            self.record(
                HistoryEntry::new(self.clock.now_utc(), request.action, target_url)
                    .with_error(Some(DUPLICATE_HISTORY_MESSAGE.to_string()))
                    .with_summary(summary),
            )
            .await;
            return Ok(DispatchOutcome::failed(None, DeliveryError::DuplicateSuppressed));
        }

        self.copy_to_clipboard(&target_url);

        let outgoing = WebhookRequest {
            url: webhook_url.clone(),
            headers: built.headers.clone(),
            body: built.body.clone(),
        };
        let (status, failure) = match self.client.deliver(&outgoing).await {
            Ok(response) => (Some(response.status_code), response.error()),
            Err(e) => (None, Some(e)),
        };

        let outcome = match failure {
            None => DispatchOutcome::delivered(status),
            Some(error) if error.is_retryable() => {
                let job = Job {
                    id: JobId::new(),
                    attempt: 0,
                    created_at: self.clock.now_utc(),
                    body: built.body,
                    headers: built.headers,
                    webhook_url: webhook_url.clone(),
                    dedupe_key: key,
                    target_url: target_url.clone(),
                    action: request.action,
                };
                self.enqueue(job, status, error).await?
            },
            Some(error) => DispatchOutcome::failed(status, error),
        };

        self.record(
            HistoryEntry::new(self.clock.now_utc(), request.action, target_url)
                .with_status(status)
                .with_error(outcome.message())
                .with_summary(summary),
        )
        .await;

        if outcome.ok {
            info!(status, "url delivered");
            if settings.show_notifications {
                let host = Url::parse(&webhook_url)
                    .ok()
                    .and_then(|url| url.host_str().map(str::to_string))
                    .unwrap_or(webhook_url);
                self.ports
                    .effects
                    .notify(SUCCESS_NOTIFICATION_TITLE, &format!("Successfully sent to {host}"));
            }
        }

        Ok(outcome)
    }

    async fn enqueue(
        &self,
        job: Job,
        status: Option<u16>,
        error: DeliveryError,
    ) -> Result<DispatchOutcome> {
        let job_id = job.id;

        if !self.queue.enqueue(job).await? {
            let full = DeliveryError::QueueFull { capacity: self.queue.capacity() };
            return Ok(DispatchOutcome::failed(status, full));
        }

        let delay = self.config.retry.backoff_delay(0);
        warn!(%job_id, error = %error, delay_ms = delay.as_millis(), "send failed, job queued");
        self.scheduler.schedule(delay);

        let mut outcome = DispatchOutcome::failed(status, error);
        outcome.retry_in = Some(delay);
        Ok(outcome)
    }

    /// Records a failure decided before any request was built.
    async fn reject(&self, request: &SendRequest, error: DeliveryError) -> DispatchOutcome {
        debug!(category = %error.category(), error = %error, "send rejected");
        self.record(
            HistoryEntry::new(self.clock.now_utc(), request.action, request.target_url.clone())
                .with_error(Some(error.user_message())),
        )
        .await;
        DispatchOutcome::failed(None, error)
    }

    fn is_blocked(&self, target: &str) -> bool {
        if target.is_empty() {
            return true;
        }

        let Some((scheme, _)) = target.split_once(':') else {
            return false;
        };
        self.config.blocked_schemes.iter().any(|blocked| blocked.eq_ignore_ascii_case(scheme))
    }

    async fn gather_page(&self, tab_id: Option<TabId>, settings: &Settings) -> PageDetails {
        let Some(tab) = tab_id else {
            return PageDetails::default();
        };
        let page = &self.ports.page;

        let title = best_effort("tab", page.tab(tab)).await.map(|t| t.title).unwrap_or_default();
        let selection = if settings.include_selection {
            best_effort("selection", page.selection_text(tab)).await.unwrap_or_default()
        } else {
            String::new()
        };
        let metadata = if settings.include_og_data {
            best_effort("page metadata", page.page_metadata(tab)).await.unwrap_or_default()
        } else {
            PageMetadata::default()
        };

        PageDetails { title, selection, metadata }
    }

    fn copy_to_clipboard(&self, text: &str) {
        let effects = self.ports.effects.clone();
        let text = text.to_string();
        tokio::spawn(async move {
            if let Err(e) = effects.copy_to_clipboard(&text).await {
                debug!(error = %e, "clipboard copy failed");
            }
        });
    }

    async fn record(&self, entry: HistoryEntry) {
        if let Err(e) = self.ports.history.append(entry).await {
            warn!(error = %e, "failed to record history entry");
        }
    }
}

#[derive(Debug, Default)]
struct PageDetails {
    title: String,
    selection: String,
    metadata: PageMetadata,
}

/// Awaits a host lookup, turning failure into `None`.
async fn best_effort<T>(
    what: &str,
    lookup: impl Future<Output = std::result::Result<T, ContextError>>,
) -> Option<T> {
    match lookup.await {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(lookup = what, error = %e, "page lookup failed");
            None
        },
    }
}
