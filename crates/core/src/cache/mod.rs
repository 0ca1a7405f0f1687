//! Shared response cache.
//!
//! `ResponseCache` is the only thing the executor talks to. It owns the key
//! canonicalizer, the TTL policy and a pluggable `CacheStore`, and it never lets
//! a backend failure escape: reads degrade to a miss, writes are dropped.

pub mod canonical;
pub mod store;
pub mod ttl;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog::EndpointCatalog;
use crate::clock::Clock;
use crate::errors::CacheError;

pub use canonical::Canonicalizer;
pub use store::{CacheStore, MemoryCacheStore};
pub use ttl::{StatusHint, TtlClass, TtlPolicy};

/// Envelope persisted by every backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    pub ttl: TtlClass,
    pub inserted_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(|error| CacheError::Encode(error.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(bytes).map_err(|error| CacheError::Decode(error.to_string()))
    }
}

pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    canonicalizer: Canonicalizer,
    policy: TtlPolicy,
    catalog: Arc<EndpointCatalog>,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        canonicalizer: Canonicalizer,
        policy: TtlPolicy,
        catalog: Arc<EndpointCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, canonicalizer, policy, catalog, clock }
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    pub fn policy(&self) -> TtlPolicy {
        self.policy
    }

    pub fn key_for(&self, endpoint: &str, params: &BTreeMap<String, Value>) -> String {
        self.canonicalizer.cache_key(endpoint, params)
    }

    /// TTL class for a fresh payload of `endpoint`.
    pub fn classify(&self, endpoint: &str, payload: &Value) -> TtlClass {
        let hint = if self.catalog.is_status_sensitive(endpoint) {
            StatusHint::from_payload(payload)
        } else {
            None
        };
        TtlPolicy::classify(self.catalog.strategy(endpoint), hint)
    }

    /// Cached payload for `key`. Backend and decode failures count as a miss.
    pub async fn lookup(&self, key: &str, correlation_id: &str) -> Option<CacheEntry> {
        let bytes = match self.store.get(key).await {
            Ok(bytes) => bytes?,
            Err(error) => {
                warn!(
                    event_name = "cache.read_failed",
                    correlation_id = %correlation_id,
                    key = %key,
                    error = %error,
                    "cache read failed; treating as miss"
                );
                return None;
            }
        };

        match CacheEntry::decode(&bytes) {
            Ok(entry) => Some(entry),
            Err(error) => {
                warn!(
                    event_name = "cache.entry_corrupt",
                    correlation_id = %correlation_id,
                    key = %key,
                    error = %error,
                    "discarding undecodable cache entry"
                );
                None
            }
        }
    }

    /// Stores a fresh payload and returns the class it was stored under, or
    /// `None` when it was not stored.
    pub async fn store(
        &self,
        key: &str,
        endpoint: &str,
        payload: &Value,
        correlation_id: &str,
    ) -> Option<TtlClass> {
        let class = self.classify(endpoint, payload);
        if !class.is_cacheable() {
            debug!(
                event_name = "cache.write_skipped",
                correlation_id = %correlation_id,
                endpoint = %endpoint,
                "endpoint is not cacheable"
            );
            return None;
        }

        let entry = CacheEntry {
            key: key.to_owned(),
            payload: payload.clone(),
            ttl: class,
            inserted_at: self.clock.now(),
        };

        let result = match entry.encode() {
            Ok(bytes) => self.store.set(key, bytes, self.policy.expiry(class)).await,
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => Some(class),
            Err(error) => {
                warn!(
                    event_name = "cache.write_failed",
                    correlation_id = %correlation_id,
                    key = %key,
                    error = %error,
                    "cache write failed; continuing without caching"
                );
                None
            }
        }
    }

    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        self.store.invalidate_prefix(prefix).await
    }

    /// Drops every cached response of one endpoint.
    pub async fn invalidate_endpoint(&self, endpoint: &str) -> Result<u64, CacheError> {
        self.store.invalidate_prefix(&self.canonicalizer.endpoint_prefix(endpoint)).await
    }

    pub async fn flush(&self) -> Result<(), CacheError> {
        self.store.flush().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use crate::catalog::EndpointCatalog;
    use crate::clock::ManualClock;
    use crate::errors::CacheError;

    use super::{CacheStore, Canonicalizer, MemoryCacheStore, ResponseCache, TtlClass, TtlPolicy};

    struct BrokenStore;

    #[async_trait::async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::Backend("disk unplugged".to_owned()))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<(), CacheError> {
            Err(CacheError::Backend("disk unplugged".to_owned()))
        }

        async fn invalidate_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
            Err(CacheError::Backend("disk unplugged".to_owned()))
        }

        async fn flush(&self) -> Result<(), CacheError> {
            Err(CacheError::Backend("disk unplugged".to_owned()))
        }
    }

    fn cache_with(store: Arc<dyn CacheStore>, clock: Arc<ManualClock>) -> ResponseCache {
        let catalog = Arc::new(EndpointCatalog::football());
        ResponseCache::new(
            store,
            Canonicalizer::new("kickoff", catalog.clone()),
            TtlPolicy::default(),
            catalog,
            clock,
        )
    }

    #[tokio::test]
    async fn finished_fixture_is_cached_indefinitely() {
        let clock = ManualClock::starting_now();
        let cache = cache_with(Arc::new(MemoryCacheStore::new(clock.clone())), clock.clone());
        let params = BTreeMap::from([("id".to_owned(), json!(1035))]);
        let key = cache.key_for("fixtures", &params);
        let payload = json!([{"fixture": {"id": 1035, "status": {"short": "FT"}}}]);

        assert_eq!(cache.store(&key, "fixtures", &payload, "test").await, Some(TtlClass::Indefinite));

        clock.advance(chrono::Duration::days(30));
        let entry = cache.lookup(&key, "test").await.expect("finished fixture still cached");
        assert_eq!(entry.payload, payload);
        assert_eq!(entry.ttl, TtlClass::Indefinite);
    }

    #[tokio::test]
    async fn live_fixture_expires_within_seconds() {
        let clock = ManualClock::starting_now();
        let cache = cache_with(Arc::new(MemoryCacheStore::new(clock.clone())), clock.clone());
        let payload = json!([{"fixture": {"status": {"short": "1H"}}}]);

        assert_eq!(cache.store("k", "fixtures", &payload, "test").await, Some(TtlClass::Live));
        clock.advance(chrono::Duration::seconds(60));
        assert!(cache.lookup("k", "test").await.is_none());
    }

    #[tokio::test]
    async fn uncacheable_endpoints_are_not_stored() {
        let clock = ManualClock::starting_now();
        let store = Arc::new(MemoryCacheStore::new(clock.clone()));
        let cache = cache_with(store.clone(), clock);

        assert_eq!(cache.store("k", "odds_live", &json!({"odds": []}), "test").await, None);
        assert_eq!(cache.store("k2", "unregistered", &json!({}), "test").await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn backend_failures_degrade_to_miss() {
        let cache = cache_with(Arc::new(BrokenStore), ManualClock::starting_now());

        assert!(cache.lookup("k", "test").await.is_none());
        assert_eq!(cache.store("k", "countries", &json!([]), "test").await, None);
        assert!(cache.flush().await.is_err());
    }
}
