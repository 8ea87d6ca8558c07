//! SQLite persistence implementing the repository pattern.
//!
//! Every piece of durable state (retry queue, dedupe table, history log and
//! settings snapshot) is a JSON document in one key/value table. Each
//! repository owns one key and is the only code that reads or writes it.

use std::{str::FromStr, sync::Arc};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tracing::debug;

pub mod dedupe;
pub mod history;
mod kv;
pub mod queue;
pub mod settings;

use crate::error::Result;

/// Container for all repositories sharing one connection pool.
#[derive(Clone)]
pub struct Storage {
    /// Retry queue.
    pub queue: Arc<queue::Repository>,

    /// Dedupe table.
    pub dedupe: Arc<dedupe::Repository>,

    /// Delivery history.
    pub history: Arc<history::Repository>,

    /// Settings snapshot.
    pub settings: Arc<settings::Repository>,

    pool: Arc<SqlitePool>,
}

impl Storage {
    /// Opens (creating if needed) the database at `database_url` and ensures
    /// the schema exists.
    ///
    /// A single connection is used: SQLite serializes writers anyway, and an
    /// in-memory database only exists for the lifetime of its connection.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is malformed, the database cannot be opened,
    /// or schema creation fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Self::new(pool);
        storage.migrate().await?;
        debug!(database_url, "storage ready");
        Ok(storage)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be created.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Wraps an existing pool. Call [`Storage::migrate`] before use.
    pub fn new(pool: SqlitePool) -> Self {
        let pool = Arc::new(pool);

        Self {
            queue: Arc::new(queue::Repository::new(pool.clone())),
            dedupe: Arc::new(dedupe::Repository::new(pool.clone())),
            history: Arc::new(history::Repository::new(pool.clone())),
            settings: Arc::new(settings::Repository::new(pool.clone())),
            pool,
        }
    }

    /// Creates the key/value table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Verifies the database answers queries.
    ///
    /// # Errors
    ///
    /// Returns error if the probe query fails.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&*self.pool).await?;
        Ok(())
    }

    /// Closes the pool, waiting for the connection to be released.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
