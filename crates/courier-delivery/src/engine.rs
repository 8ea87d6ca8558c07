//! Engine wiring.
//!
//! [`CourierEngine`] owns one of each component, shares a single delivery
//! client and clock between them, and exposes the operations a front end
//! needs: triggers, queue inspection, history, probes and settings
//! import/export.

use std::{sync::Arc, time::Duration};

use courier_core::{Clock, HistoryEntry, Job, Settings, QUEUE_CAPACITY};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient},
    context::{PageContext, SideEffects},
    dedupe::{DedupCache, DEFAULT_DEDUPE_TTL},
    dispatcher::{
        default_blocked_schemes, DispatchConfig, DispatchOutcome, DispatchPorts, Dispatcher,
        SendRequest,
    },
    error::{DeliveryError, Result},
    probe::{ProbeResult, ProbeSummary, Prober},
    processor::{PassOutcome, QueueProcessor, RetryScheduler},
    queue::JobQueue,
    retry::RetryPolicy,
    storage::{DedupeStore, HistorySink, QueueStore, SettingsSource},
    trigger::{Trigger, TriggerHandler, TriggerResponse},
};

/// Engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// HTTP client configuration.
    pub client: ClientConfig,

    /// Backoff and retry budget for queued jobs.
    pub retry: RetryPolicy,

    /// Maximum number of queued jobs.
    pub queue_capacity: usize,

    /// How long a sent payload suppresses an identical one.
    pub dedupe_ttl: Duration,

    /// Delay before the first processor pass after `start`.
    pub startup_delay: Duration,

    /// Schemes rejected as browser-internal.
    pub blocked_schemes: Vec<String>,

    /// Maximum time `shutdown` waits for timer tasks.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            retry: RetryPolicy::default(),
            queue_capacity: QUEUE_CAPACITY,
            dedupe_ttl: DEFAULT_DEDUPE_TTL,
            startup_delay: Duration::from_secs(1),
            blocked_schemes: default_blocked_schemes(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Persisted state the engine runs against.
#[derive(Clone)]
pub struct EngineStores {
    /// Settings snapshot source.
    pub settings: Arc<dyn SettingsSource>,
    /// Retry queue storage.
    pub queue: Arc<dyn QueueStore>,
    /// Dedupe table storage.
    pub dedupe: Arc<dyn DedupeStore>,
    /// History log.
    pub history: Arc<dyn HistorySink>,
}

impl EngineStores {
    /// Uses one store for every concern.
    pub fn shared<S>(store: S) -> Self
    where
        S: SettingsSource + QueueStore + DedupeStore + HistorySink + Clone,
    {
        Self {
            settings: Arc::new(store.clone()),
            queue: Arc::new(store.clone()),
            dedupe: Arc::new(store.clone()),
            history: Arc::new(store),
        }
    }
}

/// The dispatch engine.
pub struct CourierEngine {
    stores: EngineStores,
    dispatcher: Arc<Dispatcher>,
    processor: Arc<QueueProcessor>,
    triggers: TriggerHandler,
    queue: Arc<JobQueue>,
    prober: Prober,
    config: EngineConfig,
    shutdown: CancellationToken,
}

impl CourierEngine {
    /// Wires the components together. Nothing runs until a trigger arrives
    /// or [`start`](Self::start) is called.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(
        stores: EngineStores,
        page: Arc<dyn PageContext>,
        effects: Arc<dyn SideEffects>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self> {
        let client = DeliveryClient::new(config.client.clone())?;
        let shutdown = CancellationToken::new();

        let queue = Arc::new(JobQueue::with_capacity(stores.queue.clone(), config.queue_capacity));
        let dedupe =
            Arc::new(DedupCache::new(stores.dedupe.clone(), clock.clone(), config.dedupe_ttl));

        let processor = QueueProcessor::new(
            queue.clone(),
            client.clone(),
            stores.history.clone(),
            clock.clone(),
            config.retry.clone(),
            shutdown.clone(),
        );
        let scheduler: Arc<dyn RetryScheduler> = processor.clone();

        let dispatcher = Arc::new(Dispatcher::new(
            DispatchPorts {
                settings: stores.settings.clone(),
                page: page.clone(),
                effects: effects.clone(),
                history: stores.history.clone(),
            },
            client.clone(),
            dedupe,
            queue.clone(),
            scheduler.clone(),
            clock,
            DispatchConfig {
                blocked_schemes: config.blocked_schemes.clone(),
                retry: config.retry.clone(),
            },
        ));

        let triggers = TriggerHandler::new(dispatcher.clone(), page, effects, scheduler);

        Ok(Self {
            stores,
            dispatcher,
            processor,
            triggers,
            queue,
            prober: Prober::new(client),
            config,
            shutdown,
        })
    }

    /// Schedules a processor pass after the startup delay so jobs left by a
    /// previous run get drained.
    pub fn start(&self) {
        info!(
            startup_delay_ms = self.config.startup_delay.as_millis(),
            queue_capacity = self.config.queue_capacity,
            "starting courier engine"
        );
        self.processor.schedule(self.config.startup_delay);
    }

    /// Stops pending timers and waits for a pass in flight to finish.
    ///
    /// Queued jobs stay persisted for the next start.
    pub async fn shutdown(&self) {
        info!("shutting down courier engine");
        self.shutdown.cancel();

        if tokio::time::timeout(self.config.shutdown_timeout, self.processor.wait_idle())
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.config.shutdown_timeout.as_millis(),
                "processor did not stop in time"
            );
        }
    }

    /// Sends a URL directly.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if persisted state is unreachable.
    pub async fn send(&self, request: SendRequest) -> Result<DispatchOutcome> {
        self.dispatcher.send_or_enqueue(request).await
    }

    /// Handles a trigger.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if persisted state is unreachable.
    pub async fn trigger(&self, trigger: Trigger) -> Result<TriggerResponse> {
        self.triggers.handle(trigger).await
    }

    /// Runs a processor pass now and schedules whatever follow-up it needs.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the queue is unreachable.
    pub async fn retry_queue_now(&self) -> Result<PassOutcome> {
        let outcome = self.processor.run_pass().await?;
        if let Some(next) = outcome.next_delay() {
            self.processor.schedule(next);
        }
        Ok(outcome)
    }

    /// The queue processor.
    pub fn processor(&self) -> &Arc<QueueProcessor> {
        &self.processor
    }

    /// Queued jobs, head first.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the queue is unreachable.
    pub async fn queued_jobs(&self) -> Result<Vec<Job>> {
        self.queue.list().await
    }

    /// Number of queued jobs.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the queue is unreachable.
    pub async fn queue_len(&self) -> Result<usize> {
        self.queue.len().await
    }

    /// Drops every queued job and returns how many there were.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the queue is unreachable.
    pub async fn clear_queue(&self) -> Result<usize> {
        let removed = self.queue.clear().await?;
        info!(removed, "retry queue cleared");
        Ok(removed)
    }

    /// Up to `limit` history entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if history is unreachable.
    pub async fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        Ok(self.stores.history.recent(limit).await?)
    }

    /// Current settings snapshot.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if settings are unreachable.
    pub async fn settings(&self) -> Result<Settings> {
        Ok(self.stores.settings.snapshot().await?)
    }

    /// Probes one webhook URL.
    pub async fn probe(&self, url: &str) -> ProbeResult {
        self.prober.probe(url).await
    }

    /// Probes every configured webhook profile.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if settings are unreachable.
    pub async fn probe_profiles(&self) -> Result<ProbeSummary> {
        let settings = self.settings().await?;
        Ok(self.prober.probe_all(&settings.webhook_profiles).await)
    }

    /// Current settings as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if settings are unreachable.
    pub async fn export_settings(&self) -> Result<String> {
        let settings = self.settings().await?;
        serde_json::to_string_pretty(&settings)
            .map_err(|e| DeliveryError::configuration(format!("cannot encode settings: {e}")))
    }

    /// Replaces the stored settings with a JSON snapshot.
    ///
    /// Missing fields take their defaults. Nothing is saved unless the
    /// snapshot validates.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the JSON is malformed or the
    /// snapshot is invalid, `DeliveryError::Storage` if it cannot be saved.
    pub async fn import_settings(&self, json: &str) -> Result<Settings> {
        let settings: Settings = serde_json::from_str(json)
            .map_err(|e| DeliveryError::configuration(format!("invalid settings file: {e}")))?;
        settings.validate().map_err(|e| DeliveryError::configuration(e.to_string()))?;

        self.stores.settings.save(settings.clone()).await?;
        info!(profiles = settings.webhook_profiles.len(), "settings imported");
        Ok(settings)
    }
}
