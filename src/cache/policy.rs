use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// Which tier(s) an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLevel {
    Memory,
    Session,
    Local,
    All,
}

impl CacheLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLevel::Memory => "memory",
            CacheLevel::Session => "session",
            CacheLevel::Local => "local",
            CacheLevel::All => "all",
        }
    }
}

impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheLevel::Memory),
            "session" => Ok(CacheLevel::Session),
            "local" => Ok(CacheLevel::Local),
            "all" => Ok(CacheLevel::All),
            other => Err(format!("unknown cache level: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPreset {
    Short,
    Medium,
    Long,
    VeryLong,
}

impl TtlPreset {
    pub fn duration(&self) -> Duration {
        match self {
            TtlPreset::Short => Duration::from_secs(5 * 60),
            TtlPreset::Medium => Duration::from_secs(30 * 60),
            TtlPreset::Long => Duration::from_secs(24 * 60 * 60),
            TtlPreset::VeryLong => Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl From<TtlPreset> for Duration {
    fn from(preset: TtlPreset) -> Self {
        preset.duration()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetOptions {
    pub level: CacheLevel,
    pub ttl: Option<Duration>,
    pub prefix: Option<String>,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            level: CacheLevel::Memory,
            ttl: None,
            prefix: None,
        }
    }
}

impl SetOptions {
    pub fn level(level: CacheLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: impl Into<Duration>) -> Self {
        self.ttl = Some(ttl.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetOptions {
    pub level: CacheLevel,
    pub prefix: Option<String>,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            level: CacheLevel::All,
            prefix: None,
        }
    }
}

impl GetOptions {
    pub fn level(level: CacheLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!("session".parse::<CacheLevel>(), Ok(CacheLevel::Session));
        assert_eq!("ALL".parse::<CacheLevel>(), Ok(CacheLevel::All));
        assert!("disk".parse::<CacheLevel>().is_err());
        assert_eq!(CacheLevel::Local.to_string(), "local");
    }

    #[test]
    fn test_option_defaults() {
        assert_eq!(SetOptions::default().level, CacheLevel::Memory);
        assert_eq!(GetOptions::default().level, CacheLevel::All);

        let opts = SetOptions::level(CacheLevel::Local)
            .with_ttl(TtlPreset::Long)
            .with_prefix("pipelines_");
        assert_eq!(opts.ttl, Some(Duration::from_secs(86_400)));
        assert_eq!(opts.prefix.as_deref(), Some("pipelines_"));
    }
}
