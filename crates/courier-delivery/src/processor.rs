//! Retry queue processor.
//!
//! A pass takes the head job, sends it once and settles it: removed on
//! success, rewritten with a higher attempt count on a retryable failure,
//! dropped once the budget is spent or the failure is terminal. Passes never
//! loop. Each one schedules the next on a fresh timer task, and the queue is
//! re-read from storage every time.
//!
//! At most one pass runs at a time. A pass requested while another is in
//! flight returns [`PassOutcome::Busy`] without touching the queue.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use courier_core::{Action, Clock, HistoryEntry, JobId};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    client::{DeliveryClient, WebhookRequest},
    error::{DeliveryError, Result},
    queue::JobQueue,
    retry::{RetryDecision, RetryPolicy},
    storage::HistorySink,
};

/// Something that can run the processor later.
///
/// The dispatcher asks for a pass after queueing a job; tests substitute a
/// recorder to observe the requested delay.
pub trait RetryScheduler: Send + Sync + 'static {
    /// Requests a processor pass after `delay`.
    fn schedule(&self, delay: Duration);
}

/// Result of a single processor pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass was already running.
    Busy,
    /// Queue was empty.
    Idle,
    /// Head job delivered and removed.
    Delivered {
        /// Delivered job
        job_id: JobId,
    },
    /// Head job failed and stays queued.
    Retrying {
        /// Retried job
        job_id: JobId,
        /// Attempt count after this failure
        attempt: u32,
        /// Wait before the next pass
        delay: Duration,
    },
    /// Head job removed after a terminal failure.
    Dropped {
        /// Dropped job
        job_id: JobId,
        /// Error recorded in history
        error: DeliveryError,
    },
}

impl PassOutcome {
    /// Delay before the next pass, or `None` when no follow-up is needed.
    pub fn next_delay(&self) -> Option<Duration> {
        match self {
            Self::Busy | Self::Idle => None,
            Self::Delivered { .. } | Self::Dropped { .. } => Some(Duration::ZERO),
            Self::Retrying { delay, .. } => Some(*delay),
        }
    }
}

/// Clears the run flag when a pass ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives the retry queue.
pub struct QueueProcessor {
    this: Weak<Self>,
    queue: Arc<JobQueue>,
    client: DeliveryClient,
    history: Arc<dyn HistorySink>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    running: AtomicBool,
    generation: AtomicU64,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl QueueProcessor {
    /// Creates a processor. Timers stop firing once `shutdown` is cancelled.
    pub fn new(
        queue: Arc<JobQueue>,
        client: DeliveryClient,
        history: Arc<dyn HistorySink>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            queue,
            client,
            history,
            clock,
            policy,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            shutdown,
            tasks: TaskTracker::new(),
        })
    }

    /// Whether a pass is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs one pass over the head of the queue.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the queue cannot be read or
    /// updated. History failures are logged and ignored.
    pub async fn run_pass(&self) -> Result<PassOutcome> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            debug!("processor pass already running");
            return Ok(PassOutcome::Busy);
        };

        let Some(mut job) = self.queue.peek().await? else {
            return Ok(PassOutcome::Idle);
        };

        let request = WebhookRequest {
            url: job.webhook_url.clone(),
            headers: job.headers.clone(),
            body: job.body.clone(),
        };

        let (status, failure) = match self.client.deliver(&request).await {
            Ok(response) => {
                debug!(
                    job_id = %job.id,
                    status = response.status_code,
                    duration_ms = response.duration.as_millis(),
                    "queued job sent"
                );
                (Some(response.status_code), response.error())
            },
            Err(e) => (None, Some(e)),
        };

        let Some(failure) = failure else {
            self.queue.remove(job.id).await?;
            info!(job_id = %job.id, attempt = job.attempt, "queued job delivered");
            self.record(
                HistoryEntry::new(self.clock.now_utc(), Action::Retry, job.target_url.clone())
                    .with_status(status)
                    .with_summary(job.request_summary()),
            )
            .await;
            return Ok(PassOutcome::Delivered { job_id: job.id });
        };

        job.attempt += 1;
        let last_error = failure.user_message();

        match self.policy.decide(job.attempt, failure) {
            RetryDecision::Retry { delay } => {
                warn!(
                    job_id = %job.id,
                    attempt = job.attempt,
                    delay_ms = delay.as_millis(),
                    "queued job failed, retrying"
                );
                let (job_id, attempt) = (job.id, job.attempt);
                self.queue.replace(job).await?;
                Ok(PassOutcome::Retrying { job_id, attempt, delay })
            },
            RetryDecision::GiveUp { error } => {
                warn!(
                    job_id = %job.id,
                    attempt = job.attempt,
                    category = %error.category(),
                    error = %error,
                    "queued job dropped"
                );
                self.queue.remove(job.id).await?;
                self.record(
                    HistoryEntry::new(self.clock.now_utc(), job.action, job.target_url.clone())
                        .with_status(status)
                        .with_error(Some(last_error))
                        .with_summary(job.request_summary()),
                )
                .await;
                Ok(PassOutcome::Dropped { job_id: job.id, error })
            },
        }
    }

    /// Waits for every timer task spawned so far to finish.
    ///
    /// Cancel the shutdown token first or this waits out pending backoffs.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    async fn record(&self, entry: HistoryEntry) {
        if let Err(e) = self.history.append(entry).await {
            warn!(error = %e, "failed to record history entry");
        }
    }
}

impl RetryScheduler for QueueProcessor {
    /// Spawns a timer task that runs a pass after `delay` and then schedules
    /// the follow-up the pass asks for.
    ///
    /// Only the most recently scheduled timer runs its pass; older ones
    /// notice they were superseded when they wake and exit.
    fn schedule(&self, delay: Duration) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("no async runtime, processor pass not scheduled");
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(delay_ms = delay.as_millis(), generation, "processor pass scheduled");

        self.tasks.spawn(async move {
            tokio::select! {
                () = this.shutdown.cancelled() => return,
                () = this.clock.sleep(delay) => {},
            }

            if this.generation.load(Ordering::Acquire) != generation {
                return;
            }

            match this.run_pass().await {
                Ok(outcome) => {
                    if let Some(next) = outcome.next_delay() {
                        this.schedule(next);
                    }
                },
                Err(e) => warn!(error = %e, "processor pass failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use courier_core::{Job, TestClock};
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::storage::mock::MockStore;

    fn job(url: String) -> Job {
        Job {
            id: JobId::new(),
            attempt: 0,
            created_at: Utc::now(),
            body: "https://example.com/".to_string(),
            headers: HashMap::from([("Content-Type".to_string(), "text/plain".to_string())]),
            webhook_url: url,
            dedupe_key: "k".to_string(),
            target_url: "https://example.com/".to_string(),
            action: Action::Page,
        }
    }

    fn processor(store: &MockStore) -> Arc<QueueProcessor> {
        QueueProcessor::new(
            Arc::new(JobQueue::new(Arc::new(store.clone()))),
            DeliveryClient::with_defaults().unwrap(),
            Arc::new(store.clone()),
            Arc::new(TestClock::new()),
            RetryPolicy::default(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn run_guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = RunGuard::acquire(&flag).unwrap();
        assert!(RunGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(RunGuard::acquire(&flag).is_some());
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn next_delay_per_outcome() {
        let id = JobId::new();
        assert_eq!(PassOutcome::Idle.next_delay(), None);
        assert_eq!(PassOutcome::Busy.next_delay(), None);
        assert_eq!(PassOutcome::Delivered { job_id: id }.next_delay(), Some(Duration::ZERO));
        assert_eq!(
            PassOutcome::Retrying { job_id: id, attempt: 2, delay: Duration::from_secs(4) }
                .next_delay(),
            Some(Duration::from_secs(4))
        );
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let store = MockStore::new();
        assert_eq!(processor(&store).run_pass().await.unwrap(), PassOutcome::Idle);
    }

    #[tokio::test]
    async fn busy_when_guard_held() {
        let store = MockStore::new();
        let processor = processor(&store);

        let _held = RunGuard::acquire(&processor.running).unwrap();
        assert!(processor.is_running());
        assert_eq!(processor.run_pass().await.unwrap(), PassOutcome::Busy);
    }

    #[tokio::test]
    async fn success_removes_job() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = MockStore::new();
        let queued = job(server.uri());
        store.set_jobs(vec![queued.clone()]).await;

        let outcome = processor(&store).run_pass().await.unwrap();
        assert_eq!(outcome, PassOutcome::Delivered { job_id: queued.id });
        assert!(store.jobs().await.is_empty());

        let history = store.history_entries().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, Action::Retry);
        assert!(history[0].is_success());
    }

    #[tokio::test]
    async fn client_error_drops_immediately() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = MockStore::new();
        store.set_jobs(vec![job(server.uri())]).await;

        let outcome = processor(&store).run_pass().await.unwrap();
        assert!(matches!(
            outcome,
            PassOutcome::Dropped { error: DeliveryError::ClientError { status_code: 404 }, .. }
        ));
        assert!(store.jobs().await.is_empty());

        let history = store.history_entries().await;
        assert_eq!(history[0].http_status, Some(404));
        assert_eq!(history[0].action, Action::Page);
    }

    #[tokio::test]
    async fn exhausted_job_records_last_failure() {
        let store = MockStore::new();
        let mut last_try = job("http://127.0.0.1:1/hook".to_string());
        last_try.attempt = 5;
        store.set_jobs(vec![last_try]).await;

        let outcome = processor(&store).run_pass().await.unwrap();
        assert!(matches!(
            outcome,
            PassOutcome::Dropped { error: DeliveryError::RetriesExhausted { attempts: 6 }, .. }
        ));

        let history = store.history_entries().await;
        assert_eq!(history[0].http_status, None);
        assert_eq!(
            history[0].error.as_deref(),
            Some("Network error. Check your internet connection. Will retry.")
        );
    }

    #[tokio::test]
    async fn storage_failure_releases_guard() {
        let store = MockStore::new();
        store.fail_with("gone").await;
        let processor = processor(&store);

        assert!(processor.run_pass().await.is_err());
        assert!(!processor.is_running());
    }
}
