use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cache_impl::CacheError;
use super::entry::CacheItem;
use crate::storage::StorageError;
use crate::traits::{StorageBackend, TimeProvider};

// A cache tier kept in a StorageBackend. Each item is one JSON string
// stored under root + namespace + key. Every key the tier writes starts
// with `root`, so clear and cleanup reach custom namespaces too, and keys
// outside the root are never touched.
pub struct PersistentCache {
    name: &'static str,
    backend: Arc<dyn StorageBackend>,
    root: String,
    clock: Arc<dyn TimeProvider>,
}

impl PersistentCache {
    pub fn new(
        name: &'static str,
        backend: Arc<dyn StorageBackend>,
        root: impl Into<String>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            name,
            backend,
            root: root.into(),
            clock,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn storage_key(&self, key: &str, prefix: Option<&str>) -> String {
        format!("{}{}{}", self.root, prefix.unwrap_or(""), key)
    }

    // Stores the item. Returns Ok(false) when the backend stayed full even
    // after expired entries were cleared out.
    pub async fn set(
        &self,
        key: &str,
        item: &CacheItem<Value>,
        prefix: Option<&str>,
    ) -> Result<bool, CacheError> {
        let storage_key = self.storage_key(key, prefix);
        let encoded = serde_json::to_string(item).map_err(|source| CacheError::Serialize {
            key: key.to_string(),
            source,
        })?;

        match self.backend.set_item(&storage_key, &encoded).await {
            Ok(()) => Ok(true),
            Err(StorageError::QuotaExceeded { needed, quota }) => {
                warn!(
                    "{} storage quota exceeded ({} > {}), cleaning up before retrying {}",
                    self.name, needed, quota, storage_key
                );
                self.cleanup().await?;
                match self.backend.set_item(&storage_key, &encoded).await {
                    Ok(()) => Ok(true),
                    Err(StorageError::QuotaExceeded { .. }) => {
                        warn!(
                            "{} storage still full, dropping write for {}",
                            self.name, storage_key
                        );
                        Ok(false)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    // Valid item or None. Expired and undecodable entries are removed.
    pub async fn get(
        &self,
        key: &str,
        prefix: Option<&str>,
    ) -> Result<Option<CacheItem<Value>>, CacheError> {
        let storage_key = self.storage_key(key, prefix);
        let Some(raw) = self.backend.get_item(&storage_key).await? else {
            return Ok(None);
        };

        let item: CacheItem<Value> = match serde_json::from_str(&raw) {
            Ok(item) => item,
            Err(e) => {
                warn!("Dropping undecodable {} entry {}: {}", self.name, storage_key, e);
                self.backend.remove_item(&storage_key).await?;
                return Ok(None);
            }
        };

        if item.is_expired(self.clock.now_millis()) {
            debug!("{} entry expired: {}", self.name, storage_key);
            self.backend.remove_item(&storage_key).await?;
            return Ok(None);
        }

        Ok(Some(item))
    }

    pub async fn remove(&self, key: &str, prefix: Option<&str>) -> Result<(), CacheError> {
        self.backend
            .remove_item(&self.storage_key(key, prefix))
            .await?;
        Ok(())
    }

    // Removes every entry this tier wrote, in every namespace.
    pub async fn clear(&self) -> Result<usize, CacheError> {
        self.clear_namespace("").await
    }

    pub async fn clear_namespace(&self, namespace: &str) -> Result<usize, CacheError> {
        let scope = format!("{}{}", self.root, namespace);
        let mut removed = 0;
        for storage_key in self.backend.keys().await? {
            if storage_key.starts_with(&scope) {
                self.backend.remove_item(&storage_key).await?;
                removed += 1;
            }
        }
        debug!("Cleared {} {} entries under {}", removed, self.name, scope);
        Ok(removed)
    }

    // Removes expired and undecodable entries in every namespace.
    pub async fn cleanup(&self) -> Result<usize, CacheError> {
        let now = self.clock.now_millis();
        let mut removed = 0;

        for storage_key in self.backend.keys().await? {
            if !storage_key.starts_with(&self.root) {
                continue;
            }
            let stale = match self.backend.get_item(&storage_key).await? {
                Some(raw) => match serde_json::from_str::<CacheItem<Value>>(&raw) {
                    Ok(item) => item.is_expired(now),
                    Err(_) => true,
                },
                None => false,
            };
            if stale {
                self.backend.remove_item(&storage_key).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Cleaned up {} stale {} entries", removed, self.name);
        }
        Ok(removed)
    }

    // Namespace + key for every stored entry, with the root stripped.
    // Passing one back with no prefix addresses the same entry.
    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .backend
            .keys()
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.root).map(str::to_string))
            .collect())
    }

    pub async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.keys().await?.len())
    }

    pub async fn used_bytes(&self) -> usize {
        self.backend.used_bytes().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SessionStorage;
    use crate::utils::ManualClock;
    use serde_json::json;
    use std::time::Duration;

    fn tier(quota: usize) -> (PersistentCache, Arc<SessionStorage>, ManualClock) {
        let clock = ManualClock::new(0);
        let backend = Arc::new(SessionStorage::with_quota(quota));
        let cache = PersistentCache::new("session", backend.clone(), "t_", Arc::new(clock.clone()));
        (cache, backend, clock)
    }

    #[tokio::test]
    async fn test_round_trip_under_prefix() {
        let (cache, backend, _) = tier(4096);
        let item = CacheItem::new(json!({"id": 7}), Duration::from_secs(60), 0);
        assert!(cache.set("pipeline", &item, None).await.unwrap());

        assert!(backend.get_item("t_pipeline").await.unwrap().is_some());
        assert_eq!(cache.get("pipeline", None).await.unwrap(), Some(item));
        assert_eq!(cache.keys().await.unwrap(), vec!["pipeline".to_string()]);
    }

    #[tokio::test]
    async fn test_expired_and_corrupt_entries_are_removed_on_read() {
        let (cache, backend, clock) = tier(4096);
        let item = CacheItem::new(json!(1), Duration::from_millis(10), 0);
        cache.set("soon", &item, None).await.unwrap();
        backend.set_item("t_broken", "{oops").await.unwrap();

        clock.advance(Duration::from_millis(11));
        assert_eq!(cache.get("soon", None).await.unwrap(), None);
        assert_eq!(cache.get("broken", None).await.unwrap(), None);
        assert!(backend.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quota_exceeded_cleans_up_and_retries() {
        let (cache, _, clock) = tier(200);
        let stale = CacheItem::new(json!("x".repeat(60)), Duration::from_millis(5), 0);
        cache.set("stale", &stale, None).await.unwrap();

        clock.advance(Duration::from_millis(10));
        let now = clock.now_millis();
        let fresh = CacheItem::new(json!("y".repeat(60)), Duration::from_secs(60), now);
        assert!(cache.set("fresh", &fresh, None).await.unwrap());
        assert_eq!(cache.keys().await.unwrap(), vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn test_quota_still_exceeded_drops_write() {
        let (cache, _, _) = tier(64);
        let huge = CacheItem::new(json!("z".repeat(500)), Duration::from_secs(60), 0);
        assert!(!cache.set("huge", &huge, None).await.unwrap());
        assert_eq!(cache.get("huge", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_only_touches_prefixed_keys() {
        let (cache, backend, _) = tier(4096);
        backend.set_item("unrelated", "keep").await.unwrap();
        let item = CacheItem::new(json!(true), Duration::from_secs(60), 0);
        cache.set("a", &item, None).await.unwrap();
        cache.set("b", &item, None).await.unwrap();

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert_eq!(backend.keys().await.unwrap(), vec!["unrelated".to_string()]);
    }

    #[tokio::test]
    async fn test_namespaces_live_under_the_root() {
        let (cache, backend, _) = tier(4096);
        let item = CacheItem::new(json!(1), Duration::from_secs(60), 0);
        cache.set("a", &item, None).await.unwrap();
        cache.set("b", &item, Some("ai_")).await.unwrap();

        assert!(backend.get_item("t_ai_b").await.unwrap().is_some());
        let mut keys = cache.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "ai_b".to_string()]);
        assert_eq!(cache.get("ai_b", None).await.unwrap(), Some(item));

        assert_eq!(cache.clear_namespace("ai_").await.unwrap(), 1);
        assert_eq!(cache.keys().await.unwrap(), vec!["a".to_string()]);

        let other = CacheItem::new(json!(2), Duration::from_secs(60), 0);
        cache.set("c", &other, Some("ai_")).await.unwrap();
        assert_eq!(cache.clear().await.unwrap(), 2);
        assert_eq!(cache.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_quota_cleanup_reclaims_custom_namespaces() {
        let (cache, _, clock) = tier(200);
        let stale = CacheItem::new(json!("x".repeat(60)), Duration::from_millis(5), 0);
        cache.set("stale", &stale, Some("ai_")).await.unwrap();

        clock.advance(Duration::from_millis(10));
        let now = clock.now_millis();
        let fresh = CacheItem::new(json!("y".repeat(60)), Duration::from_secs(60), now);
        assert!(cache.set("fresh", &fresh, None).await.unwrap());
        assert_eq!(cache.keys().await.unwrap(), vec!["fresh".to_string()]);
    }
}
