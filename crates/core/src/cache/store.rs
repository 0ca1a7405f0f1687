use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::{system_clock, Clock};
use crate::errors::CacheError;

/// Byte-oriented key/value store with per-entry expiry.
///
/// `ttl = None` stores the entry indefinitely. Implementations must be safe to
/// share across concurrently executing calls.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Removes every entry whose key starts with `prefix`; returns the count.
    async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    async fn flush(&self) -> Result<(), CacheError>;
}

/// Absolute expiry for an entry written at `now`.
pub fn expires_at(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()).map(|ttl| now + ttl)
}

/// Default entry bound for [`MemoryCacheStore`].
pub const DEFAULT_MEMORY_MAX_ENTRIES: usize = 10_000;

#[derive(Debug)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
    last_used: AtomicU64,
}

impl StoredValue {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// In-process store bounded to `max_entries`. A write that would exceed the
/// bound first drops expired entries, then the least recently used one.
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, StoredValue>>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
    ticks: AtomicU64,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(system_clock())
    }
}

impl MemoryCacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            max_entries: DEFAULT_MEMORY_MAX_ENTRIES,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed)
    }

    /// Live entries only.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries.values().filter(|entry| !entry.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn purge_expired(&self) -> u64 {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        (before - entries.len()) as u64
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => {
                    entry.last_used.store(self.tick(), Ordering::Relaxed);
                    return Ok(Some(entry.bytes.clone()));
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        let now = self.clock.now();
        let expires_at = expires_at(now, ttl);
        let mut entries = self.entries.write().await;

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| !entry.is_expired(now));
            while entries.len() >= self.max_entries {
                let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
                    .map(|(key, _)| key.clone())
                else {
                    break;
                };
                entries.remove(&oldest);
                debug!(event_name = "cache.memory.evicted", key = %oldest, "evicted least recently used entry");
            }
        }

        let last_used = AtomicU64::new(self.tick());
        entries.insert(key.to_owned(), StoredValue { bytes: value, expires_at, last_used });
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::clock::ManualClock;

    use super::{CacheStore, MemoryCacheStore};

    #[tokio::test]
    async fn entry_expires_after_ttl_on_simulated_clock() {
        let clock = ManualClock::starting_now();
        let store = MemoryCacheStore::new(clock.clone());

        store.set("k", b"payload".to_vec(), Some(Duration::from_secs(30))).await.expect("set");
        assert_eq!(store.get("k").await.expect("get"), Some(b"payload".to_vec()));

        clock.advance(chrono::Duration::seconds(29));
        assert!(store.get("k").await.expect("get").is_some());

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(store.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn indefinite_entries_survive_any_amount_of_time() {
        let clock = ManualClock::starting_now();
        let store = MemoryCacheStore::new(clock.clone());

        store.set("countries", b"[]".to_vec(), None).await.expect("set");
        clock.advance(chrono::Duration::days(3650));
        assert!(store.get("countries").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn invalidate_prefix_removes_only_matching_keys() {
        let store = MemoryCacheStore::new(ManualClock::starting_now());
        store.set("kickoff:fixtures:id:1", vec![1], None).await.expect("set");
        store.set("kickoff:fixtures:id:2", vec![2], None).await.expect("set");
        store.set("kickoff:standings:league:39", vec![3], None).await.expect("set");

        let removed = store.invalidate_prefix("kickoff:fixtures:").await.expect("invalidate");
        assert_eq!(removed, 2);
        assert_eq!(store.len().await, 1);

        store.flush().await.expect("flush");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn purge_drops_expired_entries() {
        let clock = ManualClock::starting_now();
        let store = MemoryCacheStore::new(clock.clone());
        store.set("short", vec![1], Some(Duration::from_secs(5))).await.expect("set");
        store.set("long", vec![2], Some(Duration::from_secs(500))).await.expect("set");

        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(store.purge_expired().await, 1);
        assert!(store.get("long").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn bounded_store_evicts_least_recently_used() {
        let store = MemoryCacheStore::new(ManualClock::starting_now()).with_max_entries(2);
        store.set("countries", vec![1], None).await.expect("set");
        store.set("leagues", vec![2], None).await.expect("set");
        assert!(store.get("countries").await.expect("get").is_some());

        store.set("venues", vec![3], None).await.expect("set");

        assert_eq!(store.len().await, 2);
        assert!(store.get("leagues").await.expect("get").is_none(), "leagues was least recently used");
        assert!(store.get("countries").await.expect("get").is_some());
        assert!(store.get("venues").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn bounded_store_drops_expired_entries_before_live_ones() {
        let clock = ManualClock::starting_now();
        let store = MemoryCacheStore::new(clock.clone()).with_max_entries(2);
        store.set("countries", vec![1], None).await.expect("set");
        store.set("odds", vec![2], Some(Duration::from_secs(15))).await.expect("set");
        clock.advance(chrono::Duration::seconds(20));

        store.set("standings", vec![3], Some(Duration::from_secs(300))).await.expect("set");

        assert!(store.get("countries").await.expect("get").is_some());
        assert!(store.get("standings").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn overwriting_a_key_at_capacity_evicts_nothing() {
        let store = MemoryCacheStore::new(ManualClock::starting_now()).with_max_entries(2);
        store.set("countries", vec![1], None).await.expect("set");
        store.set("leagues", vec![2], None).await.expect("set");
        store.set("countries", vec![9], None).await.expect("set");

        assert_eq!(store.len().await, 2);
        assert_eq!(store.get("countries").await.expect("get"), Some(vec![9]));
    }

    #[test]
    fn store_is_object_safe() {
        let _store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::default());
    }
}
