//! Test infrastructure for deterministic engine tests.
//!
//! [`TestEnv`] bundles a wiremock webhook, in-memory stores, a manually
//! driven clock and recording side effects, and wires a dispatcher and
//! processor over them the same way the engine does. The dispatcher's
//! scheduler only records delays; tests drive the processor by calling
//! [`TestEnv::run_pass`].

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use courier_core::{Action, Clock, Settings, TestClock};
use courier_delivery::{
    context::StaticPageContext,
    dedupe::{DedupCache, DEFAULT_DEDUPE_TTL},
    dispatcher::{DispatchConfig, DispatchPorts},
    queue::JobQueue,
    storage::mock::MockStore,
    ClientConfig, CourierEngine, DeliveryClient, DispatchOutcome, Dispatcher, EngineConfig,
    EngineStores, PassOutcome, QueueProcessor, RetryPolicy, SendRequest,
};
use tokio_util::sync::CancellationToken;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

pub mod effects;
pub mod fixtures;

pub use effects::{RecordingScheduler, RecordingSideEffects};
pub use fixtures::{
    article_page, settings_for, JobBuilder, SettingsBuilder, TEST_SECRET, TEST_TAB,
};

/// Path the mock webhook listens on.
pub const WEBHOOK_PATH: &str = "/hook";

/// Builder for [`TestEnv`].
pub struct TestEnvBuilder {
    page: StaticPageContext,
    effects: RecordingSideEffects,
    queue_capacity: usize,
    dedupe_ttl: Duration,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self {
            page: StaticPageContext::empty(),
            effects: RecordingSideEffects::new(),
            queue_capacity: courier_core::QUEUE_CAPACITY,
            dedupe_ttl: DEFAULT_DEDUPE_TTL,
            timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

impl TestEnvBuilder {
    /// Creates a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves page lookups from `page`.
    #[must_use]
    pub fn page(mut self, page: StaticPageContext) -> Self {
        self.page = page;
        self
    }

    /// Uses `effects` as the side-effect recorder.
    #[must_use]
    pub fn effects(mut self, effects: RecordingSideEffects) -> Self {
        self.effects = effects;
        self
    }

    /// Sets the queue capacity (default: 50).
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the HTTP timeout (default: 2s).
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the environment. Settings point at the mock webhook in plain
    /// mode until a test replaces them.
    pub async fn build(self) -> Result<TestEnv> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
            )
            .with_test_writer()
            .try_init();

        let http_mock = MockServer::start().await;
        let store = MockStore::with_settings(settings_for(format!(
            "{}{WEBHOOK_PATH}",
            http_mock.uri()
        )));
        let clock = TestClock::new();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let client_config = ClientConfig { timeout: self.timeout, ..ClientConfig::default() };
        let client =
            DeliveryClient::new(client_config.clone()).context("failed to build http client")?;

        let page = Arc::new(self.page);
        let effects = Arc::new(self.effects);
        let scheduler = Arc::new(RecordingScheduler::new());
        let queue = Arc::new(JobQueue::with_capacity(Arc::new(store.clone()), self.queue_capacity));

        let dispatcher = Dispatcher::new(
            DispatchPorts {
                settings: Arc::new(store.clone()),
                page: page.clone(),
                effects: effects.clone(),
                history: Arc::new(store.clone()),
            },
            client.clone(),
            Arc::new(DedupCache::new(Arc::new(store.clone()), shared_clock.clone(), self.dedupe_ttl)),
            queue.clone(),
            scheduler.clone(),
            shared_clock.clone(),
            DispatchConfig { retry: self.retry.clone(), ..DispatchConfig::default() },
        );

        let processor = QueueProcessor::new(
            queue,
            client,
            Arc::new(store.clone()),
            shared_clock,
            self.retry.clone(),
            CancellationToken::new(),
        );

        let engine_config = EngineConfig {
            client: client_config,
            retry: self.retry,
            queue_capacity: self.queue_capacity,
            dedupe_ttl: self.dedupe_ttl,
            ..EngineConfig::default()
        };

        Ok(TestEnv {
            http_mock,
            clock,
            store,
            effects,
            scheduler,
            dispatcher,
            processor,
            page,
            engine_config,
        })
    }
}

/// Test environment around one mock webhook.
pub struct TestEnv {
    /// Mock webhook server.
    pub http_mock: MockServer,
    /// Clock shared by every component.
    pub clock: TestClock,
    /// In-memory settings, queue, dedupe table and history.
    pub store: MockStore,
    /// Clipboard and notification recorder.
    pub effects: Arc<RecordingSideEffects>,
    /// Delays the dispatcher asked the processor for.
    pub scheduler: Arc<RecordingScheduler>,
    /// Dispatcher under test.
    pub dispatcher: Dispatcher,
    /// Processor sharing the dispatcher's queue.
    pub processor: Arc<QueueProcessor>,
    page: Arc<StaticPageContext>,
    engine_config: EngineConfig,
}

impl TestEnv {
    /// Builds an environment with default configuration.
    pub async fn new() -> Result<Self> {
        TestEnvBuilder::new().build().await
    }

    /// URL of the mock webhook.
    pub fn webhook_url(&self) -> String {
        format!("{}{WEBHOOK_PATH}", self.http_mock.uri())
    }

    /// Replaces the settings; see [`SettingsBuilder`].
    pub async fn set_settings(&self, settings: Settings) {
        self.store.set_settings(settings).await;
    }

    /// Answers every POST to the webhook with `status`.
    pub async fn respond_with(&self, status: u16) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path(WEBHOOK_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.http_mock)
            .await;
    }

    /// Answers the next `times` POSTs with `status`. Mounted responses are
    /// tried in mounting order.
    pub async fn respond_with_times(&self, status: u16, times: u64) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path(WEBHOOK_PATH))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .mount(&self.http_mock)
            .await;
    }

    /// Sends `url` as an explicit request.
    pub async fn send(&self, url: &str) -> Result<DispatchOutcome> {
        self.dispatch(SendRequest::new(Action::Click, url)).await
    }

    /// Dispatches `request`.
    pub async fn dispatch(&self, request: SendRequest) -> Result<DispatchOutcome> {
        Ok(self.dispatcher.send_or_enqueue(request).await?)
    }

    /// Runs one processor pass.
    pub async fn run_pass(&self) -> Result<PassOutcome> {
        Ok(self.processor.run_pass().await?)
    }

    /// Number of requests the webhook received.
    pub async fn received_count(&self) -> usize {
        self.http_mock.received_requests().await.map_or(0, |requests| requests.len())
    }

    /// Bodies of every request the webhook received, oldest first.
    pub async fn received_bodies(&self) -> Vec<String> {
        self.http_mock
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|request| String::from_utf8_lossy(&request.body).into_owned())
            .collect()
    }

    /// A full engine over the same stores, clock, page and effects.
    pub fn engine(&self) -> Result<CourierEngine> {
        CourierEngine::new(
            EngineStores::shared(self.store.clone()),
            self.page.clone(),
            self.effects.clone(),
            Arc::new(self.clock.clone()),
            self.engine_config.clone(),
        )
        .context("failed to build engine")
    }
}
