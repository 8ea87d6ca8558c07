//! URL-to-webhook dispatch engine.
//!
//! Takes a URL captured from a page, link or shortcut, canonicalizes it,
//! renders it into a templated and optionally HMAC-signed request, and
//! delivers it to a webhook. Transient failures land in a persisted FIFO
//! queue that a single processor drains with exponential backoff.
//!
//! # Architecture
//!
//! 1. **Canonicalize** - strip tracking parameters, prefer the page's
//!    canonical link when enabled
//! 2. **Build** - plain or JSON template body, custom headers, timestamp,
//!    request id and signature
//! 3. **Dedupe** - identical payloads to the same webhook are suppressed for
//!    60 seconds unless forced
//! 4. **Send or enqueue** - one inline attempt; 429, 5xx, network errors and
//!    timeouts are queued for retry
//! 5. **Process** - the queue head is retried up to 5 times with delays of
//!    1 s doubling to 32 s
//!
//! Persisted state is reached only through the traits in [`storage`]; the
//! host environment (tabs, clipboard, notifications) only through the traits
//! in [`context`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use courier_core::{storage::Storage, Action, RealClock};
//! use courier_delivery::{
//!     context::{LogSideEffects, StaticPageContext},
//!     CourierEngine, EngineConfig, EngineStores, SendRequest, SqliteStore,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(Storage::connect("sqlite://courier.db").await?);
//! let engine = CourierEngine::new(
//!     EngineStores::shared(SqliteStore::new(storage)),
//!     Arc::new(StaticPageContext::empty()),
//!     Arc::new(LogSideEffects),
//!     Arc::new(RealClock::new()),
//!     EngineConfig::default(),
//! )?;
//!
//! engine.start();
//! let outcome = engine.send(SendRequest::new(Action::Click, "https://example.com/")).await?;
//! println!("delivered: {}", outcome.ok);
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod canonical;
pub mod client;
pub mod context;
pub mod dedupe;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod probe;
pub mod processor;
pub mod queue;
pub mod request;
pub mod retry;
pub mod signing;
pub mod storage;
pub mod trigger;

pub use client::{ClientConfig, DeliveryClient, DeliveryResponse, WebhookRequest};
pub use dispatcher::{DispatchOutcome, Dispatcher, SendRequest};
pub use engine::{CourierEngine, EngineConfig, EngineStores};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use processor::{PassOutcome, QueueProcessor, RetryScheduler};
pub use retry::{RetryDecision, RetryPolicy};
pub use storage::SqliteStore;
pub use trigger::{Trigger, TriggerResponse};
