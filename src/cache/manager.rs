use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::cache_impl::{CacheError, CacheMetrics, MemoryCache};
use super::entry::CacheItem;
use super::persistent::PersistentCache;
use super::policy::{CacheLevel, GetOptions, SetOptions};
use crate::config::{CacheConfig, Config};
use crate::storage::{LocalStorage, SessionStorage};
use crate::traits::{StorageBackend, TimeProvider};
use crate::utils::SystemClock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub memory: usize,
    pub session: usize,
    pub local: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.memory + self.session + self.local
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_max_size: usize,
    pub memory_metrics: CacheMetrics,
    pub hit_rate: f64,
    pub session_entries: usize,
    pub session_bytes: usize,
    pub local_entries: usize,
    pub local_bytes: usize,
}

struct Maintenance {
    handle: JoinHandle<()>,
    stop: Arc<Notify>,
}

// Read-through hierarchy over memory, session and local tiers. Reads with
// CacheLevel::All walk the tiers in that order and copy lower-tier hits
// back into memory.
//
// Built explicitly and shared through an Arc by whoever needs it.
pub struct CacheManager {
    memory: MemoryCache<Value>,
    session: PersistentCache,
    local: PersistentCache,
    config: CacheConfig,
    clock: Arc<dyn TimeProvider>,
    maintenance: Mutex<Option<Maintenance>>,
}

impl CacheManager {
    pub fn new(
        config: CacheConfig,
        session_backend: Arc<dyn StorageBackend>,
        local_backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        let root = config.key_prefix.clone();
        Self {
            memory: MemoryCache::new(config.memory_max_size, clock.clone()),
            session: PersistentCache::new("session", session_backend, root.clone(), clock.clone()),
            local: PersistentCache::new("local", local_backend, root, clock.clone()),
            config,
            clock,
            maintenance: Mutex::new(None),
        }
    }

    // Session tier in memory, local tier on disk when a path is configured.
    pub async fn from_config(config: &Config) -> Result<Self, CacheError> {
        let cache = &config.cache;
        let session: Arc<dyn StorageBackend> =
            Arc::new(SessionStorage::with_quota(cache.session_quota_bytes));
        let local: Arc<dyn StorageBackend> = match &cache.local_storage_path {
            Some(path) => Arc::new(LocalStorage::open(path, cache.local_quota_bytes).await?),
            None => Arc::new(SessionStorage::with_quota(cache.local_quota_bytes)),
        };

        Ok(Self::new(cache.clone(), session, local, Arc::new(SystemClock)))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // Namespace + key. Memory entries are keyed by it directly and the
    // persistent tiers store it under the configured root, so every tier
    // sees the same key space.
    fn memory_key(&self, key: &str, prefix: Option<&str>) -> String {
        format!("{}{}", prefix.unwrap_or(""), key)
    }

    // Example:
    // manager.set("pipelines", &list, SetOptions::level(CacheLevel::Session)).await?;
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Result<(), CacheError> {
        let data = serde_json::to_value(value).map_err(|source| CacheError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.set_value(key, data, options).await
    }

    pub async fn set_value(
        &self,
        key: &str,
        data: Value,
        options: SetOptions,
    ) -> Result<(), CacheError> {
        let ttl = options.ttl.unwrap_or_else(|| self.config.default_ttl());
        let prefix = options.prefix.as_deref();
        debug!("Cache set {} at level {} (ttl {:?})", key, options.level, ttl);

        if matches!(options.level, CacheLevel::Memory | CacheLevel::All) {
            self.memory
                .put(self.memory_key(key, prefix), data.clone(), ttl)
                .await;
        }

        let now = self.now();
        if matches!(options.level, CacheLevel::Session | CacheLevel::All) {
            let item = CacheItem::new(data.clone(), ttl, now);
            self.session.set(key, &item, prefix).await?;
        }
        if matches!(options.level, CacheLevel::Local | CacheLevel::All) {
            let item = CacheItem::new(data, ttl, now);
            self.local.set(key, &item, prefix).await?;
        }
        Ok(())
    }

    // None on a miss, on expiry, or when nothing valid is left in any tier.
    // Example:
    // let list: Option<Vec<Pipeline>> = manager.get("pipelines", GetOptions::default()).await?;
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        options: GetOptions,
    ) -> Result<Option<T>, CacheError> {
        match self.get_value(key, options).await? {
            Some(data) => serde_json::from_value(data)
                .map(Some)
                .map_err(|source| CacheError::Deserialize {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    pub async fn get_value(
        &self,
        key: &str,
        options: GetOptions,
    ) -> Result<Option<Value>, CacheError> {
        let prefix = options.prefix.as_deref();
        let memory_key = self.memory_key(key, prefix);

        match options.level {
            CacheLevel::Memory => Ok(self.memory.get(&memory_key).await),
            CacheLevel::Session => Ok(self.session.get(key, prefix).await?.map(|i| i.data)),
            CacheLevel::Local => Ok(self.local.get(key, prefix).await?.map(|i| i.data)),
            CacheLevel::All => {
                if let Some(data) = self.memory.get(&memory_key).await {
                    return Ok(Some(data));
                }
                for tier in [&self.session, &self.local] {
                    if let Some(item) = tier.get(key, prefix).await? {
                        self.promote(memory_key, &item).await;
                        debug!(
                    "Cache hit for {} in {} tier, promoted to memory",
                    key,
                    tier.name()
                );
                        return Ok(Some(item.data));
                    }
                }
                debug!("Cache miss for {}", key);
                Ok(None)
            }
        }
    }

    // A promoted copy never outlives the item it was copied from.
    async fn promote(&self, memory_key: String, item: &CacheItem<Value>) {
        let ttl = self
            .config
            .promotion_ttl()
            .min(item.remaining_ttl(self.now()));
        self.memory.put(memory_key, item.data.clone(), ttl).await;
    }

    pub async fn has(&self, key: &str, prefix: Option<&str>) -> Result<bool, CacheError> {
        if self.memory.contains(&self.memory_key(key, prefix)).await {
            return Ok(true);
        }
        Ok(self.session.get(key, prefix).await?.is_some()
            || self.local.get(key, prefix).await?.is_some())
    }

    // Removes the key from every tier.
    pub async fn delete(&self, key: &str, prefix: Option<&str>) -> Result<(), CacheError> {
        debug!("Cache delete {}", key);
        self.memory.remove(&self.memory_key(key, prefix)).await;
        self.session.remove(key, prefix).await?;
        self.local.remove(key, prefix).await?;
        Ok(())
    }

    // Persistent tiers lose every namespace the cache wrote, not only the
    // default one.
    pub async fn clear(&self, level: CacheLevel) -> Result<(), CacheError> {
        info!("Clearing cache level {}", level);
        if matches!(level, CacheLevel::Memory | CacheLevel::All) {
            self.memory.clear().await;
        }
        if matches!(level, CacheLevel::Session | CacheLevel::All) {
            self.session.clear().await?;
        }
        if matches!(level, CacheLevel::Local | CacheLevel::All) {
            self.local.clear().await?;
        }
        Ok(())
    }

    // Drops every entry whose namespace + key contains `pattern`, in every
    // tier. The configured root is not part of what is matched.
    pub async fn invalidate_matching(&self, pattern: &str) -> Result<usize, CacheError> {
        let mut removed = self.memory.remove_where(|key| key.contains(pattern)).await;

        for tier in [&self.session, &self.local] {
            for key in tier.keys().await? {
                if key.contains(pattern) {
                    tier.remove(&key, None).await?;
                    removed += 1;
                }
            }
        }

        debug!("Invalidated {} entries matching {:?}", removed, pattern);
        Ok(removed)
    }

    pub async fn cleanup(&self) -> Result<CleanupReport, CacheError> {
        let report = CleanupReport {
            memory: self.memory.cleanup_expired().await,
            session: self.session.cleanup().await?,
            local: self.local.cleanup().await?,
        };
        if report.total() > 0 {
            info!("Cache cleanup removed {:?}", report);
        }
        Ok(report)
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let memory_metrics = self.memory.metrics().await;
        Ok(CacheStats {
            memory_entries: self.memory.len().await,
            memory_max_size: self.memory.max_size(),
            hit_rate: memory_metrics.hit_rate(),
            memory_metrics,
            session_entries: self.session.len().await?,
            session_bytes: self.session.used_bytes().await,
            local_entries: self.local.len().await?,
            local_bytes: self.local.used_bytes().await,
        })
    }

    // Returns the cached value when there is one, otherwise runs `fetcher`
    // and caches what it returns. Failed fetches are not cached.
    // Example:
    // let insights = manager
    //     .cached_fetch("ai_insights", SetOptions::default(), || client.insights())
    //     .await?;
    pub async fn cached_fetch<T, F, Fut>(
        &self,
        key: &str,
        options: SetOptions,
        fetcher: F,
    ) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let lookup = GetOptions {
            level: options.level,
            prefix: options.prefix.clone(),
        };
        if let Some(hit) = self.get::<T>(key, lookup).await? {
            return Ok(hit);
        }

        let fresh = fetcher().await?;
        self.set(key, &fresh, options).await?;
        Ok(fresh)
    }

    // Runs cleanup every `interval` until stop_maintenance is called or the
    // manager is dropped.
    pub async fn start_maintenance(self: &Arc<Self>, interval: Duration) {
        let mut guard = self.maintenance.lock().await;
        if guard.is_some() {
            debug!("Cache maintenance task already running");
            return;
        }

        let stop = Arc::new(Notify::new());
        let stop_clone = stop.clone();
        let weak: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop_clone.notified() => {
                        debug!("Cache maintenance task stopping...");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(manager) = weak.upgrade() else { break };
                        if let Err(e) = manager.cleanup().await {
                            error!("Error during cache cleanup: {:?}", e);
                        }
                    }
                }
            }
        });

        info!("Started cache maintenance every {:?}", interval);
        *guard = Some(Maintenance { handle, stop });
    }

    pub async fn stop_maintenance(&self) -> Result<(), CacheError> {
        let Some(maintenance) = self.maintenance.lock().await.take() else {
            return Ok(());
        };
        maintenance.stop.notify_one();
        maintenance
            .handle
            .await
            .map_err(|e| CacheError::Task(e.to_string()))
    }

    pub async fn is_maintenance_running(&self) -> bool {
        self.maintenance
            .lock()
            .await
            .as_ref()
            .map_or(false, |m| !m.handle.is_finished())
    }

    fn now(&self) -> u64 {
        self.clock.now_millis()
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if let Some(maintenance) = self.maintenance.get_mut().take() {
            maintenance.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::policy::TtlPreset;
    use crate::utils::ManualClock;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pipeline {
        id: u32,
        name: String,
    }

    fn manager() -> (CacheManager, ManualClock) {
        let clock = ManualClock::new(0);
        let manager = CacheManager::new(
            CacheConfig {
                memory_max_size: 3,
                ..CacheConfig::default()
            },
            Arc::new(SessionStorage::new()),
            Arc::new(SessionStorage::new()),
            Arc::new(clock.clone()),
        );
        (manager, clock)
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let (manager, _) = manager();
        let pipeline = Pipeline { id: 1, name: "orders".into() };
        manager.set("p1", &pipeline, SetOptions::default()).await.unwrap();

        let back: Option<Pipeline> = manager.get("p1", GetOptions::default()).await.unwrap();
        assert_eq!(back, Some(pipeline));
    }

    #[tokio::test]
    async fn test_wrong_type_is_a_deserialize_error() {
        let (manager, _) = manager();
        manager.set("n", &5u32, SetOptions::default()).await.unwrap();
        let err = manager.get::<Pipeline>("n", GetOptions::default()).await.unwrap_err();
        assert!(matches!(err, CacheError::Deserialize { .. }));
    }

    #[tokio::test]
    async fn test_promotion_never_outlives_source() {
        let (manager, clock) = manager();
        let opts = SetOptions::level(CacheLevel::Session).with_ttl(Duration::from_secs(60));
        manager.set("k", &"v", opts).await.unwrap();

        clock.advance(Duration::from_secs(30));
        let hit = manager.get::<String>("k", GetOptions::default()).await.unwrap();
        assert_eq!(hit.as_deref(), Some("v"));

        // Memory copy got the 30s the session item had left, not the full preset
        let memory = manager.memory.peek("k").await.unwrap();
        assert_eq!(memory.ttl, 30_000);
        assert!(memory.ttl < TtlPreset::Short.duration().as_millis() as u64);
    }

    #[tokio::test]
    async fn test_set_all_and_clear_single_level() {
        let (manager, _) = manager();
        manager.set("k", &1, SetOptions::level(CacheLevel::All)).await.unwrap();
        manager.clear(CacheLevel::Memory).await.unwrap();

        let at = |level| manager.get::<i32>("k", GetOptions::level(level));
        assert_eq!(at(CacheLevel::Memory).await.unwrap(), None);
        assert_eq!(at(CacheLevel::Session).await.unwrap(), Some(1));
        assert_eq!(at(CacheLevel::Local).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_custom_prefix_is_separate_namespace() {
        let (manager, _) = manager();
        let opts = SetOptions::level(CacheLevel::All).with_prefix("ai_");
        manager.set("insights", &"a", opts).await.unwrap();

        assert_eq!(manager.get::<String>("insights", GetOptions::default()).await.unwrap(), None);
        let scoped = GetOptions::default().with_prefix("ai_");
        let hit = manager.get::<String>("insights", scoped.clone()).await.unwrap();
        assert_eq!(hit.as_deref(), Some("a"));
        assert!(manager.has("insights", Some("ai_")).await.unwrap());
        assert!(!manager.has("insights", None).await.unwrap());

        manager.delete("insights", Some("ai_")).await.unwrap();
        assert_eq!(manager.get::<String>("insights", scoped).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_matching() {
        let (manager, _) = manager();
        manager.set("pipeline_1", &1, SetOptions::level(CacheLevel::All)).await.unwrap();
        manager.set("pipeline_2", &2, SetOptions::level(CacheLevel::Session)).await.unwrap();
        manager.set("user", &3, SetOptions::level(CacheLevel::Local)).await.unwrap();

        assert_eq!(manager.invalidate_matching("pipeline_").await.unwrap(), 4);
        assert!(!manager.has("pipeline_1", None).await.unwrap());
        assert!(!manager.has("pipeline_2", None).await.unwrap());
        assert!(manager.has("user", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_matching_sees_custom_namespaces() {
        let (manager, _) = manager();
        let ai = SetOptions::level(CacheLevel::All).with_prefix("ai_");
        manager.set("pipeline_1", &1, ai).await.unwrap();

        // The storage root is not part of the matched key
        assert_eq!(manager.invalidate_matching("app_cache").await.unwrap(), 0);

        assert_eq!(manager.invalidate_matching("pipeline_").await.unwrap(), 3);
        let scoped = GetOptions::default().with_prefix("ai_");
        assert_eq!(manager.get::<i32>("pipeline_1", scoped).await.unwrap(), None);

        let session_ai = SetOptions::level(CacheLevel::Session).with_prefix("ai_");
        manager.set("x", &1, session_ai).await.unwrap();
        assert_eq!(manager.invalidate_matching("ai_").await.unwrap(), 1);
        assert!(!manager.has("x", Some("ai_")).await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_report() {
        let (manager, clock) = manager();
        let short = SetOptions::level(CacheLevel::All).with_ttl(Duration::from_secs(1));
        manager.set("old", &0, short).await.unwrap();
        manager.set("new", &1, SetOptions::level(CacheLevel::All)).await.unwrap();
        clock.advance(Duration::from_secs(2));

        let report = manager.cleanup().await.unwrap();
        assert_eq!(report, CleanupReport { memory: 1, session: 1, local: 1 });

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.memory_entries, 1);
        assert_eq!(stats.session_entries, 1);
        assert_eq!(stats.local_entries, 1);
        assert_eq!(stats.memory_max_size, 3);
    }
}
