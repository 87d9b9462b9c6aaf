//! In-memory cache strategy with a periodic expiry sweep.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Cache, CacheEntry, CacheStrategy, expiry_from};
use crate::clock::Clock;
use crate::error::CacheError;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: serde_json::Value,
    expires_at: u64,
}

impl StoredEntry {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Map-backed cache. Expired entries are evicted on read and by a background
/// sweep, so abandoned keys do not accumulate.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, StoredEntry>>,
    clock: Arc<dyn Clock>,
    sweeper: OnceLock<JoinHandle<()>>,
}

impl MemoryCache {
    /// Create a cache and, when called inside a tokio runtime, start its sweep
    /// task. A zero `sweep_interval` disables the sweep.
    pub fn new(clock: Arc<dyn Clock>, sweep_interval: Duration) -> Arc<Self> {
        let cache = Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            sweeper: OnceLock::new(),
        });

        if !sweep_interval.is_zero()
            && let Ok(runtime) = tokio::runtime::Handle::try_current()
        {
            let handle = runtime.spawn(sweep_loop(Arc::downgrade(&cache), sweep_interval));
            let _ = cache.sweeper.set(handle);
        }

        cache
    }

    /// Remove every expired entry. Returns the number removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Swept expired cache entries");
        }
        removed
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get() {
            handle.abort();
        }
    }
}

async fn sweep_loop(cache: Weak<MemoryCache>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // First tick fires immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(cache) = cache.upgrade() else {
            break;
        };
        cache.sweep_expired().await;
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn strategy(&self) -> CacheStrategy {
        CacheStrategy::InMemory
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = expiry_from(self.clock.now_ms(), ttl);
        self.entries
            .write()
            .await
            .insert(key.to_string(), StoredEntry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let now = self.clock.now_ms();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Re-check under the write lock; a concurrent set may have refreshed it.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            debug!(key, "Evicted expired cache entry on read");
        }
        Ok(None)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn get_all_entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let now = self.clock.now_ms();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| CacheEntry {
                key: key.clone(),
                value: entry.value.clone(),
                ttl_ms: entry.expires_at - now,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;
    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;

    fn cache_with_clock() -> (Arc<MemoryCache>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = MemoryCache::new(clock.clone(), Duration::ZERO);
        (cache, clock)
    }

    #[tokio::test]
    async fn set_then_get_before_ttl() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", json!("v"), Duration::from_millis(1000)).await.unwrap();
        clock.advance(Duration::from_millis(999));
        assert_eq!(cache.get("k").await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn get_after_ttl_is_absent_and_evicts() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", json!({"n": 1}), Duration::from_millis(1000)).await.unwrap();
        clock.advance(Duration::from_millis(1001));
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn set_overwrites() {
        let (cache, _clock) = cache_with_clock();
        cache.set("k", json!(1), Duration::from_secs(10)).await.unwrap();
        cache.set("k", json!(2), Duration::from_secs(10)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(2)));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let (cache, _clock) = cache_with_clock();
        cache.set("a", json!(1), Duration::from_secs(10)).await.unwrap();
        cache.set("b", json!(2), Duration::from_secs(10)).await.unwrap();
        cache.clear().await.unwrap();
        assert!(cache.is_empty().await);
        assert_eq!(cache.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn all_entries_report_remaining_ttl() {
        let (cache, clock) = cache_with_clock();
        cache.set("live", json!("x"), Duration::from_millis(5000)).await.unwrap();
        cache.set("dead", json!("y"), Duration::from_millis(1000)).await.unwrap();
        clock.advance(Duration::from_millis(2000));

        let entries = cache.get_all_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "live");
        assert_eq!(entries[0].ttl_ms, 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_evicts_without_reads() {
        let clock = Arc::new(ManualClock::default());
        let cache = MemoryCache::new(clock.clone(), Duration::from_secs(1));
        cache.set("gone", json!(1), Duration::from_millis(100)).await.unwrap();
        cache.set("kept", json!(2), Duration::from_secs(60)).await.unwrap();

        clock.advance(Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("kept").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn concurrent_distinct_keys_do_not_mix() {
        let (cache, _clock) = cache_with_clock();
        let tasks = (0..100).map(|i| {
            let cache = Arc::clone(&cache);
            async move {
                let key = format!("key-{i}");
                cache.set(&key, json!({"i": i}), Duration::from_secs(60)).await.unwrap();
                cache.get(&key).await.unwrap()
            }
        });
        let results = join_all(tasks).await;
        for (i, value) in results.into_iter().enumerate() {
            assert_eq!(value, Some(json!({"i": i})));
        }
    }
}
