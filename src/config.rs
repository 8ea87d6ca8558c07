//! Configuration for the courier binary.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use courier_delivery::{
    dispatcher::default_blocked_schemes, ClientConfig, EngineConfig, RetryPolicy,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default configuration file, read from the working directory.
pub const CONFIG_FILE: &str = "courier.toml";

/// Prefix of environment overrides, e.g. `COURIER_QUEUE_CAPACITY`.
pub const ENV_PREFIX: &str = "COURIER_";

/// Runtime configuration.
///
/// Loaded in priority order (highest first):
/// 1. `COURIER_`-prefixed environment variables
/// 2. The configuration file (`courier.toml` unless overridden)
/// 3. Built-in defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database holding settings, queue, dedupe table and history.
    pub database_url: String,
    /// Webhook request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Maximum number of queued jobs.
    pub queue_capacity: usize,
    /// Highest attempt count a queued job may reach and still be retried.
    pub max_retry_attempts: u32,
    /// Backoff delay for attempt 0, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Upper bound on any backoff delay, in milliseconds.
    pub retry_max_delay_ms: u64,
    /// Duplicate suppression window in milliseconds.
    pub dedupe_ttl_ms: u64,
    /// Number of history entries kept.
    pub history_limit: usize,
    /// Delay before draining the queue after `run` starts, in milliseconds.
    pub startup_delay_ms: u64,
    /// URL schemes that are never sent.
    pub blocked_schemes: Vec<String>,
    /// User agent for webhook requests.
    pub user_agent: String,
    /// Log filter used when `RUST_LOG` is unset.
    pub rust_log: String,
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            database_url: "sqlite://courier.db".to_string(),
            request_timeout_secs: 10,
            queue_capacity: courier_core::QUEUE_CAPACITY,
            max_retry_attempts: retry.max_attempts,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 32_000,
            dedupe_ttl_ms: 60_000,
            history_limit: courier_core::HISTORY_LIMIT,
            startup_delay_ms: 1000,
            blocked_schemes: default_blocked_schemes(),
            user_agent: ClientConfig::default().user_agent,
            rust_log: "info,courier=debug".to_string(),
        }
    }
}

impl Config {
    /// Loads defaults, then the file at `path` if it exists, then the
    /// environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .context("failed to load configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Engine configuration derived from these values.
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            client: self.to_client_config(),
            retry: self.to_retry_policy(),
            queue_capacity: self.queue_capacity,
            dedupe_ttl: Duration::from_millis(self.dedupe_ttl_ms),
            startup_delay: Duration::from_millis(self.startup_delay_ms),
            blocked_schemes: self.blocked_schemes.clone(),
            ..EngineConfig::default()
        }
    }

    /// HTTP client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.request_timeout_secs),
            user_agent: self.user_agent.clone(),
            ..ClientConfig::default()
        }
    }

    /// Retry policy for queued jobs.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            anyhow::bail!("database_url must not be empty");
        }

        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }

        if self.history_limit == 0 {
            anyhow::bail!("history_limit must be greater than 0");
        }

        if self.retry_base_delay_ms == 0 {
            anyhow::bail!("retry_base_delay_ms must be greater than 0");
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            anyhow::bail!("retry_base_delay_ms cannot exceed retry_max_delay_ms");
        }

        if self.dedupe_ttl_ms == 0 {
            anyhow::bail!("dedupe_ttl_ms must be greater than 0");
        }

        Ok(())
    }
}
