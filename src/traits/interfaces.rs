use async_trait::async_trait;

use crate::storage::StorageError;

// Key/value string store with a byte quota. Session and local tiers of the
// cache, and the preferences store, all sit on top of this.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
    async fn clear(&self) -> Result<(), StorageError>;

    // Sum of key and value byte lengths currently held.
    async fn used_bytes(&self) -> usize;
}

pub trait TimeProvider: Send + Sync {
    // Milliseconds since the unix epoch.
    fn now_millis(&self) -> u64;
}
