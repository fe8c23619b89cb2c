pub mod cache;
pub mod config;
pub mod error_boundary;
pub mod preferences;
pub mod security;
pub mod storage;
pub mod traits;
pub mod utils;

pub use cache::{CacheError, CacheLevel, CacheManager, GetOptions, SetOptions, TtlPreset};
pub use config::Config;
