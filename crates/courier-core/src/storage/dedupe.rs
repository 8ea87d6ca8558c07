//! Repository for the dedupe table.

use std::sync::Arc;

use sqlx::SqlitePool;

use super::kv;
use crate::{error::Result, models::DedupeTable};

const KEY: &str = "dedupe";

/// Repository for the dedupe key to last-seen timestamp table.
pub struct Repository {
    pool: Arc<SqlitePool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Loads the table. A missing document is an empty table.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or the document cannot be decoded.
    pub async fn load(&self) -> Result<DedupeTable> {
        Ok(kv::get(&*self.pool, KEY).await?.unwrap_or_default())
    }

    /// Replaces the stored table.
    ///
    /// # Errors
    ///
    /// Returns error if the upsert fails.
    pub async fn save(&self, table: &DedupeTable) -> Result<()> {
        kv::put(&*self.pool, KEY, table).await
    }
}
