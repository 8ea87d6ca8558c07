//! Repository for the persisted retry queue.
//!
//! Stores the whole queue as one ordered document. Capacity and FIFO
//! discipline are enforced by the delivery engine, not here.

use std::sync::Arc;

use sqlx::SqlitePool;

use super::kv;
use crate::{error::Result, models::Job};

const KEY: &str = "queue";

/// Repository for the retry queue document.
pub struct Repository {
    pool: Arc<SqlitePool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Loads the queue, head first. A missing document is an empty queue.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or the document cannot be decoded.
    pub async fn load(&self) -> Result<Vec<Job>> {
        Ok(kv::get(&*self.pool, KEY).await?.unwrap_or_default())
    }

    /// Replaces the stored queue.
    ///
    /// # Errors
    ///
    /// Returns error if the upsert fails.
    pub async fn save(&self, jobs: &[Job]) -> Result<()> {
        kv::put(&*self.pool, KEY, jobs).await
    }
}
