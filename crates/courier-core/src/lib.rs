//! Core domain models, settings and persistence.
//!
//! Provides the job and history records shared by the delivery engine, the
//! settings snapshot that drives request building, SQLite-backed storage for
//! all durable state, and the clock abstraction used to make timing
//! deterministic in tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod settings;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result, SettingsError};
pub use models::{
    Action, DedupeTable, HistoryEntry, Job, JobId, RequestSummary, TabId, HISTORY_LIMIT,
    QUEUE_CAPACITY,
};
pub use settings::{CustomHeader, PayloadMode, Settings, WebhookProfile, DEFAULT_JSON_TEMPLATE};
pub use time::{Clock, RealClock, TestClock};
