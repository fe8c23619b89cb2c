use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::traits::StorageBackend;
use crate::utils::DEFAULT_STORAGE_QUOTA;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage quota exceeded: need {needed} bytes, quota is {quota}")]
    QuotaExceeded { needed: usize, quota: usize },
    #[error("Persist error: {0}")]
    PersistError(String),
    #[error("Restore error: {0}")]
    RestoreError(String),
}

impl From<std::io::Error> for StorageError {
    fn from(error: std::io::Error) -> Self {
        StorageError::PersistError(error.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> StorageError {
        StorageError::PersistError(err.to_string())
    }
}

fn entry_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

// Plain map with byte accounting, shared by both backends.
#[derive(Debug, Default)]
struct QuotaMap {
    items: HashMap<String, String>,
    used: usize,
}

impl QuotaMap {
    fn from_items(items: HashMap<String, String>) -> Self {
        let used = items.iter().map(|(k, v)| entry_size(k, v)).sum();
        Self { items, used }
    }

    fn insert(&mut self, key: &str, value: &str, quota: usize) -> Result<(), StorageError> {
        let previous = self
            .items
            .get(key)
            .map(|old| entry_size(key, old))
            .unwrap_or(0);
        let needed = self.used - previous + entry_size(key, value);
        if needed > quota {
            return Err(StorageError::QuotaExceeded { needed, quota });
        }
        self.items.insert(key.to_string(), value.to_string());
        self.used = needed;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        let old = self.items.remove(key)?;
        self.used -= entry_size(key, &old);
        Some(old)
    }

    // Puts `key` back the way it was before a failed write.
    fn restore(&mut self, key: &str, previous: Option<String>) {
        self.remove(key);
        if let Some(old) = previous {
            self.used += entry_size(key, &old);
            self.items.insert(key.to_string(), old);
        }
    }
}

// Lives as long as the process, like a browser tab's sessionStorage.
#[derive(Debug)]
pub struct SessionStorage {
    store: RwLock<QuotaMap>,
    quota: usize,
}

impl SessionStorage {
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_STORAGE_QUOTA)
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            store: RwLock::new(QuotaMap::default()),
            quota,
        }
    }

    pub fn quota(&self) -> usize {
        self.quota
    }
}

impl Default for SessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for SessionStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.store.read().await.items.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.store.write().await.insert(key, value, self.quota)
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.store.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.store.read().await.items.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        *self.store.write().await = QuotaMap::default();
        Ok(())
    }

    async fn used_bytes(&self) -> usize {
        self.store.read().await.used
    }
}

// Survives restarts: the whole map is written to a JSON file after every
// change and read back on open.
#[derive(Debug)]
pub struct LocalStorage {
    store: RwLock<QuotaMap>,
    path: PathBuf,
    quota: usize,
}

impl LocalStorage {
    pub async fn open(path: impl AsRef<Path>, quota: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let items = Self::load_snapshot_from_file(&path).await?;
        debug!("Opened local storage at {:?} with {} items", path, items.len());

        Ok(Self {
            store: RwLock::new(QuotaMap::from_items(items)),
            path,
            quota,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_snapshot_from_file(path: &Path) -> Result<HashMap<String, String>, StorageError> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(StorageError::RestoreError(e.to_string())),
        };

        match serde_json::from_slice(&data) {
            Ok(items) => Ok(items),
            Err(e) => {
                warn!("Local storage file {:?} is corrupt, starting empty: {}", path, e);
                Ok(HashMap::new())
            }
        }
    }

    async fn save_snapshot_to_file(
        &self,
        items: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let snapshot = serde_json::to_vec(items)?;

        let mut f_handle = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .await?;

        f_handle.write_all(&snapshot).await?;
        f_handle.flush().await?;

        debug!("Local storage written to file: {:?}", self.path);
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.store.read().await.items.get(key).cloned())
    }

    // The in-memory map only keeps a change once the file write succeeded.
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut store = self.store.write().await;
        let previous = store.items.get(key).cloned();
        store.insert(key, value, self.quota)?;
        if let Err(e) = self.save_snapshot_to_file(&store.items).await {
            store.restore(key, previous);
            return Err(e);
        }
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut store = self.store.write().await;
        let Some(previous) = store.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.save_snapshot_to_file(&store.items).await {
            store.restore(key, Some(previous));
            return Err(e);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.store.read().await.items.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut store = self.store.write().await;
        self.save_snapshot_to_file(&HashMap::new()).await?;
        *store = QuotaMap::default();
        Ok(())
    }

    async fn used_bytes(&self) -> usize {
        self.store.read().await.used
    }
}
