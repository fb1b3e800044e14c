// src/algorithms/mod.rs

pub mod factory;
pub mod fixed_window;
pub mod sliding_window;
pub mod token_bucket;

pub use factory::build_limiter;
pub use fixed_window::FixedWindow;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use super::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Outcome of a single admission check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    /// Whether the request was allowed
    pub allowed: bool,

    /// Requests still admissible right now
    pub remaining: u64,

    /// Capacity the limiter enforces
    pub limit: u64,

    /// When the limiter is back to full capacity for this key
    pub reset_at: DateTime<Utc>,

    /// Earliest moment a denied request may succeed; unset when allowed
    pub retry_at: Option<DateTime<Utc>>,
}

/// Core trait that all rate limiting algorithms implement
#[async_trait]
pub trait Limiter: Send + Sync + Debug {
    /// Algorithm name, as used in configuration
    fn name(&self) -> &'static str;

    /// Checks `key` against the limit and records the request when admitted
    async fn check(&self, key: &str) -> Result<Decision>;
}

pub type SharedLimiter = Arc<dyn Limiter>;

/// Striped async locks so read-modify-write checks on one key never interleave
#[derive(Debug)]
pub(crate) struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    pub(crate) fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub(crate) async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[index].lock().await
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Window length in milliseconds, never zero
pub(crate) fn window_millis(window: std::time::Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1)
}

/// Timestamp for `ms` since the epoch, clamped to `fallback` when out of range
pub(crate) fn at_millis(ms: i64, fallback: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(fallback)
}

#[cfg(test)]
mod tests;
