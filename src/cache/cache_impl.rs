use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::entry::CacheItem;
use crate::storage::StorageError;
use crate::traits::TimeProvider;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Failed to serialize value for key {key}: {source}")]
    Serialize {
        key: String,
        source: serde_json::Error,
    },
    #[error("Cached value for key {key} has an unexpected shape: {source}")]
    Deserialize {
        key: String,
        source: serde_json::Error,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Maintenance task error: {0}")]
    Task(String),
}

// Bounded in-process tier. When full, inserting a new key first evicts the
// entry with the oldest last_accessed.
pub struct MemoryCache<V> {
    cache_store: RwLock<HashMap<String, CacheItem<V>>>,

    // Hits, misses, evictions and expirations.
    metrics: RwLock<CacheMetrics>,

    max_size: usize,
    clock: Arc<dyn TimeProvider>,
}

impl<V: Clone + Send + Sync> MemoryCache<V> {
    pub fn new(max_size: usize, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            cache_store: RwLock::new(HashMap::new()),
            metrics: RwLock::new(CacheMetrics::new()),
            max_size: max_size.max(1),
            clock,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    // Adds or replaces a value. Only a new key can trigger an eviction.
    // Example:
    // cache.put("user123".into(), profile, TtlPreset::Short.duration()).await;
    pub async fn put(&self, key: String, value: V, ttl: Duration) {
        let now = self.clock.now_millis();
        let mut store = self.cache_store.write().await;

        if !store.contains_key(&key) && store.len() >= self.max_size {
            if let Some(evicted) = Self::evict_oldest(&mut store) {
                debug!("Memory tier full, evicted key: {}", evicted);
                self.metrics.write().await.record_eviction();
            }
        }

        store.insert(key, CacheItem::new(value, ttl, now));
    }

    // Returns the value when present and still valid. Expired entries are
    // dropped on the way.
    // Example:
    // let profile = cache.get("user123").await; // Some(profile) or None
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_millis();
        let mut store = self.cache_store.write().await;

        let expired = match store.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.metrics.write().await.record_miss();
                return None;
            }
        };

        if expired {
            store.remove(key);
            let mut metrics = self.metrics.write().await;
            metrics.record_expiration();
            metrics.record_miss();
            debug!("Memory tier entry expired: {}", key);
            return None;
        }

        let entry = store.get_mut(key)?;
        entry.update_access_time(now);
        self.metrics.write().await.record_hit();
        Some(entry.data.clone())
    }

    // Full item, without touching access bookkeeping or metrics.
    pub async fn peek(&self, key: &str) -> Option<CacheItem<V>> {
        self.cache_store.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        self.cache_store
            .read()
            .await
            .get(key)
            .map_or(false, |entry| entry.is_valid(now))
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.cache_store.write().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.cache_store.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.cache_store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache_store.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.cache_store.read().await.keys().cloned().collect()
    }

    // Drops every expired entry, returns how many went.
    pub async fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut store = self.cache_store.write().await;

        let before_count = store.len();
        store.retain(|_, entry| entry.is_valid(now));
        let removed = before_count - store.len();

        if removed > 0 {
            self.metrics.write().await.expirations += removed;
        }
        removed
    }

    // Removes every key for which the predicate holds.
    pub async fn remove_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let mut store = self.cache_store.write().await;
        let before_count = store.len();
        store.retain(|key, _| !predicate(key));
        before_count - store.len()
    }

    pub async fn metrics(&self) -> CacheMetrics {
        self.metrics.read().await.clone()
    }

    // Example:
    // cache.report_metrics().await; // "Hits: 10, Misses: 3, Evictions: 5, Expirations: 1"
    pub async fn report_metrics(&self) -> String {
        self.metrics.read().await.report()
    }

    fn evict_oldest(store: &mut HashMap<String, CacheItem<V>>) -> Option<String> {
        let oldest = store
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone())?;
        store.remove(&oldest);
        Some(oldest)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    pub hits: usize,
    pub misses: usize,
    pub evictions: usize,
    pub expirations: usize,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn report(&self) -> String {
        format!(
            "Hits: {}, Misses: {}, Evictions: {}, Expirations: {}",
            self.hits, self.misses, self.evictions, self.expirations
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    fn cache(max_size: usize) -> (MemoryCache<u32>, ManualClock) {
        let clock = ManualClock::new(0);
        (MemoryCache::new(max_size, Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (cache, _) = cache(4);
        cache.put("a".into(), 1, Duration::from_secs(1)).await;
        assert_eq!(cache.get("a").await, Some(1));
        assert_eq!(cache.get("b").await, None);

        let metrics = cache.metrics().await;
        assert_eq!((metrics.hits, metrics.misses), (1, 1));
        assert_eq!(cache.peek("a").await.unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed() {
        let (cache, clock) = cache(4);
        cache.put("a".into(), 1, Duration::from_millis(100)).await;

        clock.advance(Duration::from_millis(100));
        assert_eq!(cache.get("a").await, Some(1));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.metrics().await.expirations, 1);
    }

    #[tokio::test]
    async fn test_evicts_least_recently_accessed() {
        let (cache, clock) = cache(3);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            cache.put(key.to_string(), i as u32, Duration::from_secs(60)).await;
            clock.advance(Duration::from_millis(10));
        }

        // "a" becomes the most recent, so "b" is now the oldest
        cache.get("a").await;
        clock.advance(Duration::from_millis(10));

        cache.put("d".into(), 3, Duration::from_secs(60)).await;
        assert_eq!(cache.len().await, 3);
        assert!(cache.peek("b").await.is_none());
        assert!(cache.peek("a").await.is_some());
        assert!(cache.peek("d").await.is_some());
        assert_eq!(cache.metrics().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let (cache, _) = cache(2);
        cache.put("a".into(), 1, Duration::from_secs(60)).await;
        cache.put("b".into(), 2, Duration::from_secs(60)).await;
        cache.put("a".into(), 10, Duration::from_secs(60)).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("a").await, Some(10));
        assert_eq!(cache.get("b").await, Some(2));
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let (cache, clock) = cache(8);
        cache.put("short".into(), 1, Duration::from_millis(10)).await;
        cache.put("long".into(), 2, Duration::from_secs(10)).await;
        clock.advance(Duration::from_millis(50));

        assert_eq!(cache.cleanup_expired().await, 1);
        assert_eq!(cache.keys().await, vec!["long".to_string()]);
    }
}
