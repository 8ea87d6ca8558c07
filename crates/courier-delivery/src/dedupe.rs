//! Time-windowed duplicate suppression.
//!
//! A send is a duplicate when the same method, destination and body were
//! seen less than one TTL ago. Suppression is advisory: keys are a 64-bit
//! non-cryptographic hash and collisions are tolerated.

use std::{sync::Arc, time::Duration};

use courier_core::Clock;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{error::Result, storage::DedupeStore};

/// Default suppression window.
pub const DEFAULT_DEDUPE_TTL: Duration = Duration::from_secs(60);

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Fingerprint of a POST to `webhook_url` carrying `body`.
///
/// FNV-1a over `"POST|{webhook_url}|{body}"`, as lowercase hex. Stable
/// across processes and platforms.
pub fn dedupe_key(webhook_url: &str, body: &str) -> String {
    let hash = ["POST|", webhook_url, "|", body]
        .iter()
        .flat_map(|part| part.bytes())
        .fold(FNV_OFFSET_BASIS, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME));

    format!("{hash:x}")
}

/// Dedupe table with lazy expiry.
pub struct DedupCache {
    store: Arc<dyn DedupeStore>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    lock: Mutex<()>,
}

impl DedupCache {
    /// Creates a cache over `store` with the given window.
    pub fn new(store: Arc<dyn DedupeStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self { store, clock, ttl_ms, lock: Mutex::new(()) }
    }

    /// Returns `true` if `key` was recorded less than one TTL ago.
    ///
    /// A hit writes nothing, so the original timestamp keeps bounding the
    /// window. A miss drops expired entries, records `key` at the current
    /// time and persists the table.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the table cannot be loaded or
    /// saved.
    pub async fn should_suppress(&self, key: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let now = self.clock.now_millis();
        let mut table = self.store.load().await?;

        if let Some(&last_seen) = table.get(key) {
            if now - last_seen < self.ttl_ms {
                debug!(key, age_ms = now - last_seen, "duplicate suppressed");
                return Ok(true);
            }
        }

        table.retain(|_, &mut seen| now - seen < self.ttl_ms);
        table.insert(key.to_string(), now);
        self.store.save(table).await?;

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{DedupeTable, TestClock};

    use super::*;
    use crate::storage::mock::MockStore;

    fn cache(store: &MockStore, clock: &TestClock) -> DedupCache {
        DedupCache::new(Arc::new(store.clone()), Arc::new(clock.clone()), DEFAULT_DEDUPE_TTL)
    }

    #[test]
    fn key_is_deterministic_and_input_sensitive() {
        let a = dedupe_key("https://hook.example/in", "https://example.com/");
        assert_eq!(a, dedupe_key("https://hook.example/in", "https://example.com/"));
        assert_ne!(a, dedupe_key("https://hook.example/other", "https://example.com/"));
        assert_ne!(a, dedupe_key("https://hook.example/in", "https://example.com/x"));
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn key_matches_fnv1a_reference() {
        let expected = b"POST||".iter().fold(FNV_OFFSET_BASIS, |h, &b| {
            (h ^ u64::from(b)).wrapping_mul(FNV_PRIME)
        });
        assert_eq!(dedupe_key("", ""), format!("{expected:x}"));
    }

    #[tokio::test]
    async fn second_call_within_ttl_is_suppressed() {
        let store = MockStore::new();
        let clock = TestClock::new();
        let cache = cache(&store, &clock);

        assert!(!cache.should_suppress("k").await.unwrap());
        clock.advance(Duration::from_secs(30));
        assert!(cache.should_suppress("k").await.unwrap());

        clock.advance(Duration::from_secs(31));
        assert!(!cache.should_suppress("k").await.unwrap());
    }

    #[tokio::test]
    async fn hit_does_not_refresh_timestamp() {
        let store = MockStore::new();
        let clock = TestClock::new();
        let cache = cache(&store, &clock);

        assert!(!cache.should_suppress("k").await.unwrap());
        let first_seen = store.dedupe_table().await["k"];
        let saves = store.dedupe_save_count();

        clock.advance(Duration::from_secs(59));
        assert!(cache.should_suppress("k").await.unwrap());
        assert_eq!(store.dedupe_table().await["k"], first_seen);
        assert_eq!(store.dedupe_save_count(), saves);

        clock.advance(Duration::from_secs(1));
        assert!(!cache.should_suppress("k").await.unwrap());
    }

    #[tokio::test]
    async fn miss_purges_expired_entries() {
        let store = MockStore::new();
        let clock = TestClock::new();
        let now = clock.now_millis();
        store
            .set_dedupe_table(DedupeTable::from([
                ("old".to_string(), now - 60_000),
                ("fresh".to_string(), now - 1_000),
            ]))
            .await;

        let cache = cache(&store, &clock);
        assert!(!cache.should_suppress("new").await.unwrap());

        let table = store.dedupe_table().await;
        assert!(!table.contains_key("old"));
        assert!(table.contains_key("fresh"));
        assert_eq!(table["new"], now);
    }

    #[tokio::test]
    async fn store_failure_surfaces() {
        let store = MockStore::new();
        store.fail_with("unavailable").await;
        let cache = cache(&store, &TestClock::new());

        assert!(cache.should_suppress("k").await.is_err());
    }
}
