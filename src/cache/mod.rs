pub mod cache_impl;
pub mod entry;
pub mod manager;
pub mod persistent;
pub mod policy;

pub use cache_impl::{CacheError, CacheMetrics, MemoryCache};
pub use entry::CacheItem;
pub use manager::{CacheManager, CacheStats, CleanupReport};
pub use persistent::PersistentCache;
pub use policy::{CacheLevel, GetOptions, SetOptions, TtlPreset};
