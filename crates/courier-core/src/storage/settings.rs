//! Repository for the settings snapshot.

use std::sync::Arc;

use sqlx::SqlitePool;

use super::kv;
use crate::{error::Result, settings::Settings};

const KEY: &str = "settings";

/// Repository for the stored settings snapshot.
pub struct Repository {
    pool: Arc<SqlitePool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Loads the stored snapshot, or `None` if nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or the document cannot be decoded.
    pub async fn load(&self) -> Result<Option<Settings>> {
        kv::get(&*self.pool, KEY).await
    }

    /// Stores `settings` as-is. Callers validate first.
    ///
    /// # Errors
    ///
    /// Returns error if the upsert fails.
    pub async fn save(&self, settings: &Settings) -> Result<()> {
        kv::put(&*self.pool, KEY, settings).await
    }
}
