use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::traits::TimeProvider;

pub const DEFAULT_KEY_PREFIX: &str = "app_cache_"; // Prefix for every persisted cache key
pub const DEFAULT_MEMORY_MAX_SIZE: usize = 100; // Maximum number of entries in the memory tier
pub const DEFAULT_STORAGE_QUOTA: usize = 5 * 1024 * 1024; // Browsers give roughly 5 MiB per origin

pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn duration_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeProvider for SystemClock {
    fn now_millis(&self) -> u64 {
        epoch_millis(SystemTime::now())
    }
}

// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_millis(by), Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_700_000_000_000)
    }
}

impl TimeProvider for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// Delay before retry number `attempt` (0-based): base * 2^attempt, capped.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

// Random jitter of up to `fraction` of the delay, added on top of it.
pub fn with_jitter(delay: Duration, fraction: f64) -> Duration {
    let max_jitter = (delay.as_millis() as f64 * fraction) as u64;
    if max_jitter == 0 {
        return delay;
    }
    let jitter: u64 = rand::thread_rng().gen_range(0..max_jitter);
    delay + Duration::from_millis(jitter)
}
