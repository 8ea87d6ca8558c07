//! Storage ports for the dispatch engine.
//!
//! The engine reaches persisted state only through these traits. Production
//! uses [`SqliteStore`] over `courier_core::storage::Storage`; tests use
//! [`mock::MockStore`], which keeps everything in memory and can be told to
//! fail.

use std::{future::Future, pin::Pin, sync::Arc};

use courier_core::{
    error::Result, models::HISTORY_LIMIT, storage::Storage, DedupeTable, HistoryEntry, Job,
    Settings,
};

/// Boxed future returned by the store traits.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Source of the settings snapshot.
pub trait SettingsSource: Send + Sync + 'static {
    /// Current settings, or defaults if none were saved.
    fn snapshot(&self) -> StoreFuture<'_, Settings>;

    /// Replaces the stored settings. Only settings import writes here.
    fn save(&self, settings: Settings) -> StoreFuture<'_, ()>;
}

/// Durable storage for the retry queue.
///
/// Capacity is enforced by the caller.
pub trait QueueStore: Send + Sync + 'static {
    /// Loads the queue, head first.
    fn load(&self) -> StoreFuture<'_, Vec<Job>>;

    /// Replaces the queue.
    fn save(&self, jobs: Vec<Job>) -> StoreFuture<'_, ()>;
}

/// Durable storage for the dedupe table.
pub trait DedupeStore: Send + Sync + 'static {
    /// Loads the table.
    fn load(&self) -> StoreFuture<'_, DedupeTable>;

    /// Replaces the table.
    fn save(&self, table: DedupeTable) -> StoreFuture<'_, ()>;
}

/// Append-only delivery log.
pub trait HistorySink: Send + Sync + 'static {
    /// Prepends `entry`; the sink trims to its own limit.
    fn append(&self, entry: HistoryEntry) -> StoreFuture<'_, ()>;

    /// Up to `limit` entries, newest first.
    fn recent(&self, limit: usize) -> StoreFuture<'_, Vec<HistoryEntry>>;
}

/// SQLite adapter implementing every store trait.
#[derive(Clone)]
pub struct SqliteStore {
    storage: Arc<Storage>,
    history_limit: usize,
}

impl SqliteStore {
    /// Creates an adapter keeping the default number of history entries.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage, history_limit: HISTORY_LIMIT }
    }

    /// Overrides how many history entries are kept.
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}

impl SettingsSource for SqliteStore {
    fn snapshot(&self) -> StoreFuture<'_, Settings> {
        Box::pin(async move { Ok(self.storage.settings.load().await?.unwrap_or_default()) })
    }

    fn save(&self, settings: Settings) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.storage.settings.save(&settings).await })
    }
}

impl QueueStore for SqliteStore {
    fn load(&self) -> StoreFuture<'_, Vec<Job>> {
        Box::pin(self.storage.queue.load())
    }

    fn save(&self, jobs: Vec<Job>) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.storage.queue.save(&jobs).await })
    }
}

impl DedupeStore for SqliteStore {
    fn load(&self) -> StoreFuture<'_, DedupeTable> {
        Box::pin(self.storage.dedupe.load())
    }

    fn save(&self, table: DedupeTable) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.storage.dedupe.save(&table).await })
    }
}

impl HistorySink for SqliteStore {
    fn append(&self, entry: HistoryEntry) -> StoreFuture<'_, ()> {
        Box::pin(self.storage.history.append(entry, self.history_limit))
    }

    fn recent(&self, limit: usize) -> StoreFuture<'_, Vec<HistoryEntry>> {
        Box::pin(self.storage.history.recent(limit))
    }
}

pub mod mock {
    //! In-memory store for tests.
    //!
    //! Holds queue, dedupe table, history and settings behind async locks and
    //! records how many saves each table received. Load and save failures
    //! can be injected to exercise error paths.

    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use courier_core::{
        error::{CoreError, Result},
        models::HISTORY_LIMIT,
        DedupeTable, HistoryEntry, Job, Settings,
    };
    use tokio::sync::RwLock;

    use super::{DedupeStore, HistorySink, QueueStore, SettingsSource, StoreFuture};

    /// In-memory implementation of every store trait.
    #[derive(Clone, Default)]
    pub struct MockStore {
        settings: Arc<RwLock<Settings>>,
        queue: Arc<RwLock<Vec<Job>>>,
        dedupe: Arc<RwLock<DedupeTable>>,
        history: Arc<RwLock<Vec<HistoryEntry>>>,
        queue_saves: Arc<AtomicUsize>,
        dedupe_saves: Arc<AtomicUsize>,
        failure: Arc<RwLock<Option<String>>>,
    }

    impl MockStore {
        /// Creates an empty store with default settings.
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates an empty store with the given settings.
        pub fn with_settings(settings: Settings) -> Self {
            Self { settings: Arc::new(RwLock::new(settings)), ..Self::default() }
        }

        /// Replaces the settings.
        pub async fn set_settings(&self, settings: Settings) {
            *self.settings.write().await = settings;
        }

        /// Current queue contents.
        pub async fn jobs(&self) -> Vec<Job> {
            self.queue.read().await.clone()
        }

        /// Seeds the queue.
        pub async fn set_jobs(&self, jobs: Vec<Job>) {
            *self.queue.write().await = jobs;
        }

        /// Current dedupe table.
        pub async fn dedupe_table(&self) -> DedupeTable {
            self.dedupe.read().await.clone()
        }

        /// Seeds the dedupe table.
        pub async fn set_dedupe_table(&self, table: DedupeTable) {
            *self.dedupe.write().await = table;
        }

        /// Every history entry, newest first.
        pub async fn history_entries(&self) -> Vec<HistoryEntry> {
            self.history.read().await.clone()
        }

        /// Number of queue saves so far.
        pub fn queue_save_count(&self) -> usize {
            self.queue_saves.load(Ordering::SeqCst)
        }

        /// Number of dedupe saves so far.
        pub fn dedupe_save_count(&self) -> usize {
            self.dedupe_saves.load(Ordering::SeqCst)
        }

        /// Makes every subsequent operation fail with `message`.
        pub async fn fail_with(&self, message: impl Into<String>) {
            *self.failure.write().await = Some(message.into());
        }

        /// Clears an injected failure.
        pub async fn recover(&self) {
            *self.failure.write().await = None;
        }

        async fn check(&self) -> Result<()> {
            match self.failure.read().await.as_ref() {
                Some(message) => Err(CoreError::Database(message.clone())),
                None => Ok(()),
            }
        }
    }

    impl SettingsSource for MockStore {
        fn snapshot(&self) -> StoreFuture<'_, Settings> {
            Box::pin(async move {
                self.check().await?;
                Ok(self.settings.read().await.clone())
            })
        }

        fn save(&self, settings: Settings) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                self.check().await?;
                *self.settings.write().await = settings;
                Ok(())
            })
        }
    }

    impl QueueStore for MockStore {
        fn load(&self) -> StoreFuture<'_, Vec<Job>> {
            Box::pin(async move {
                self.check().await?;
                Ok(self.queue.read().await.clone())
            })
        }

        fn save(&self, jobs: Vec<Job>) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                self.check().await?;
                *self.queue.write().await = jobs;
                self.queue_saves.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    impl DedupeStore for MockStore {
        fn load(&self) -> StoreFuture<'_, DedupeTable> {
            Box::pin(async move {
                self.check().await?;
                Ok(self.dedupe.read().await.clone())
            })
        }

        fn save(&self, table: DedupeTable) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                self.check().await?;
                *self.dedupe.write().await = table;
                self.dedupe_saves.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    impl HistorySink for MockStore {
        fn append(&self, entry: HistoryEntry) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                self.check().await?;
                let mut history = self.history.write().await;
                history.insert(0, entry);
                history.truncate(HISTORY_LIMIT);
                Ok(())
            })
        }

        fn recent(&self, limit: usize) -> StoreFuture<'_, Vec<HistoryEntry>> {
            Box::pin(async move {
                self.check().await?;
                Ok(self.history.read().await.iter().take(limit).cloned().collect())
            })
        }
    }
}
