//! Bounded FIFO retry queue over a [`QueueStore`].
//!
//! Every operation reloads the persisted queue, applies its change and
//! writes it back. An in-process mutex serializes these read-modify-write
//! cycles so a dispatcher enqueue cannot interleave with a processor update.
//! Updates to the head are keyed by job id: if the job was removed in the
//! meantime (queue cleared), the update is a no-op.

use std::sync::Arc;

use courier_core::{Job, JobId, QUEUE_CAPACITY};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{error::Result, storage::QueueStore};

/// Persisted retry queue with a fixed capacity.
pub struct JobQueue {
    store: Arc<dyn QueueStore>,
    capacity: usize,
    lock: Mutex<()>,
}

impl JobQueue {
    /// Creates a queue holding at most [`QUEUE_CAPACITY`] jobs.
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self::with_capacity(store, QUEUE_CAPACITY)
    }

    /// Creates a queue holding at most `capacity` jobs.
    pub fn with_capacity(store: Arc<dyn QueueStore>, capacity: usize) -> Self {
        Self { store, capacity, lock: Mutex::new(()) }
    }

    /// Maximum number of jobs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `job` at the tail.
    ///
    /// Returns `false` and leaves the queue untouched when it is full.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the queue cannot be loaded or
    /// saved.
    pub async fn enqueue(&self, job: Job) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut jobs = self.store.load().await?;

        if jobs.len() >= self.capacity {
            warn!(capacity = self.capacity, job_id = %job.id, "retry queue full, job rejected");
            return Ok(false);
        }

        debug!(job_id = %job.id, position = jobs.len(), "job queued");
        jobs.push(job);
        self.store.save(jobs).await?;
        Ok(true)
    }

    /// The job at the head, if any.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the queue cannot be loaded.
    pub async fn peek(&self) -> Result<Option<Job>> {
        let _guard = self.lock.lock().await;
        Ok(self.store.load().await?.into_iter().next())
    }

    /// Removes the job with `id`. Returns whether it was found.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the queue cannot be loaded or
    /// saved.
    pub async fn remove(&self, id: JobId) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut jobs = self.store.load().await?;

        let Some(position) = jobs.iter().position(|job| job.id == id) else {
            return Ok(false);
        };

        jobs.remove(position);
        self.store.save(jobs).await?;
        Ok(true)
    }

    /// Overwrites the stored job that has the same id as `job`, keeping its
    /// position. Returns whether it was found.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the queue cannot be loaded or
    /// saved.
    pub async fn replace(&self, job: Job) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut jobs = self.store.load().await?;

        let Some(slot) = jobs.iter_mut().find(|stored| stored.id == job.id) else {
            return Ok(false);
        };

        *slot = job;
        self.store.save(jobs).await?;
        Ok(true)
    }

    /// Every queued job, head first.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the queue cannot be loaded.
    pub async fn list(&self) -> Result<Vec<Job>> {
        let _guard = self.lock.lock().await;
        Ok(self.store.load().await?)
    }

    /// Number of queued jobs.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the queue cannot be loaded.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }

    /// Whether the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the queue cannot be loaded.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drops every queued job. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the queue cannot be saved.
    pub async fn clear(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let removed = self.store.load().await?.len();
        self.store.save(Vec::new()).await?;
        Ok(removed)
    }
}
