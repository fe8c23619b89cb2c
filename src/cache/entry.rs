use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::duration_millis;

// One cached value plus its bookkeeping. Times are epoch milliseconds, the
// ttl is in milliseconds. Field names match what is written to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheItem<T> {
    pub data: T,
    pub timestamp: u64,
    pub ttl: u64,
    pub access_count: u64,
    pub last_accessed: u64,
}

impl<T> CacheItem<T> {
    pub fn new(data: T, ttl: Duration, now: u64) -> Self {
        Self {
            data,
            timestamp: now,
            ttl: duration_millis(ttl),
            access_count: 0,
            last_accessed: now,
        }
    }

    // Valid while now - timestamp <= ttl. An item stamped in the future is valid.
    pub fn is_valid(&self, now: u64) -> bool {
        now.saturating_sub(self.timestamp) <= self.ttl
    }

    pub fn is_expired(&self, now: u64) -> bool {
        !self.is_valid(now)
    }

    pub fn update_access_time(&mut self, now: u64) {
        self.access_count += 1;
        self.last_accessed = now;
    }

    pub fn remaining_ttl(&self, now: u64) -> Duration {
        let age = now.saturating_sub(self.timestamp);
        Duration::from_millis(self.ttl.saturating_sub(age))
    }
}
