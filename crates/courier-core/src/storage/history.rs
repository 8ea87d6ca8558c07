//! Repository for the delivery history log.
//!
//! History is append-only from the engine's point of view: entries are
//! prepended and the log is trimmed so only the newest ones survive.

use std::sync::Arc;

use sqlx::SqlitePool;

use super::kv;
use crate::{error::Result, models::HistoryEntry};

const KEY: &str = "history";

/// Repository for the history document.
pub struct Repository {
    pool: Arc<SqlitePool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Prepends `entry` and keeps at most `limit` entries.
    ///
    /// Read and write happen inside one transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    pub async fn append(&self, entry: HistoryEntry, limit: usize) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let mut entries: Vec<HistoryEntry> = kv::get(&mut *tx, KEY).await?.unwrap_or_default();
        entries.insert(0, entry);
        entries.truncate(limit);
        kv::put(&mut *tx, KEY, &entries).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Returns up to `limit` entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or the document cannot be decoded.
    pub async fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> = kv::get(&*self.pool, KEY).await?.unwrap_or_default();
        entries.truncate(limit);
        Ok(entries)
    }

    /// Deletes every entry.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn clear(&self) -> Result<()> {
        kv::delete(&*self.pool, KEY).await
    }
}
