use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::cache::policy::TtlPreset;
use crate::utils::{
    duration_millis, DEFAULT_KEY_PREFIX, DEFAULT_MEMORY_MAX_SIZE, DEFAULT_STORAGE_QUOTA,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory_max_size: usize,
    pub default_ttl_ms: u64,
    pub promotion_ttl_ms: u64,
    pub key_prefix: String,
    pub session_quota_bytes: usize,
    pub local_quota_bytes: usize,
    // In-memory local tier when unset.
    pub local_storage_path: Option<PathBuf>,
    pub maintenance_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_max_size: DEFAULT_MEMORY_MAX_SIZE,
            default_ttl_ms: duration_millis(TtlPreset::Medium.duration()),
            promotion_ttl_ms: duration_millis(TtlPreset::Short.duration()),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            session_quota_bytes: DEFAULT_STORAGE_QUOTA,
            local_quota_bytes: DEFAULT_STORAGE_QUOTA,
            local_storage_path: None,
            maintenance_interval_ms: 60_000,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn promotion_ttl(&self) -> Duration {
        Duration::from_millis(self.promotion_ttl_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    // Backend the frontend talks to; allowed as a connect source.
    pub api_origin: String,
    pub extra_connect_sources: Vec<String>,
    pub hsts_max_age_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_origin: "http://localhost:8000".to_string(),
            extra_connect_sources: Vec::new(),
            hsts_max_age_secs: 31_536_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub security: SecurityConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_json(&data).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let config: Config = serde_json::from_slice(data).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.memory_max_size == 0 {
            bail!("cache.memory_max_size must be at least 1");
        }
        if self.cache.default_ttl_ms == 0 {
            bail!("cache.default_ttl_ms must be positive");
        }
        if self.cache.key_prefix.is_empty() {
            bail!("cache.key_prefix must not be empty");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            bail!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms,
                self.retry.max_delay_ms
            );
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}
