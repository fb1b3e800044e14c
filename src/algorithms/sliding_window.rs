// src/algorithms/sliding_window.rs

use crate::algorithms::{at_millis, window_millis, Decision, KeyLocks, Limiter};
use crate::clock::SharedClock;
use crate::config::LimiterSettings;
use crate::error::Result;
use crate::storage::{decode_counter, StorageBackend, StoragePipeline};
use async_trait::async_trait;
use std::time::Duration;

/// Default number of sub-buckets per window
pub const DEFAULT_PRECISION: u32 = 10;

/// Sliding Window rate limiting algorithm
///
/// The window is divided into `precision` buckets; a request is admitted while
/// the buckets covering the last window hold fewer than `rate` hits. This is
/// the only algorithm the shared backends run, since it needs nothing beyond
/// get, increment and expire.
#[derive(Debug)]
pub struct SlidingWindow<S>
where
    S: StorageBackend,
{
    /// Storage backend for persisting bucket counters
    storage: S,

    rate: u64,
    window_ms: i64,
    precision: u32,
    clock: SharedClock,
    namespace: String,
    locks: KeyLocks,
}

impl<S> SlidingWindow<S>
where
    S: StorageBackend,
{
    pub fn new(storage: S, settings: &LimiterSettings, clock: SharedClock) -> Self {
        Self {
            storage,
            rate: settings.rate,
            window_ms: window_millis(settings.window),
            precision: DEFAULT_PRECISION,
            clock,
            namespace: "sw".to_string(),
            locks: KeyLocks::default(),
        }
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision.max(1);
        self
    }

    /// Prefix for every storage key this limiter writes
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Bucket length in milliseconds, never zero
    fn bucket_ms(&self) -> i64 {
        (self.window_ms / self.precision as i64).max(1)
    }

    /// Number of buckets needed to cover a whole window
    fn buckets_per_window(&self) -> i64 {
        let bucket_ms = self.bucket_ms();
        self.window_ms.saturating_add(bucket_ms - 1) / bucket_ms
    }

    fn bucket_key(&self, key: &str, index: i64) -> String {
        format!("{}:{}:{}", self.namespace, key, index)
    }
}

#[async_trait]
impl<S> Limiter for SlidingWindow<S>
where
    S: StorageBackend,
{
    fn name(&self) -> &'static str {
        "sliding_window"
    }

    async fn check(&self, key: &str) -> Result<Decision> {
        let _guard = self.locks.lock(key).await;

        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let bucket_ms = self.bucket_ms();
        let buckets = self.buckets_per_window();
        let current = now_ms.div_euclid(bucket_ms);
        let first = current - (buckets - 1);

        // Fetch every bucket in the window in one round trip
        let mut pipeline = self.storage.pipeline();
        for index in first..=current {
            pipeline.get(&self.bucket_key(key, index));
        }
        let mut counts = Vec::with_capacity(buckets as usize);
        for result in self.storage.execute_pipeline(pipeline).await? {
            counts.push(decode_counter(&result?)?.max(0) as u64);
        }

        let mut total: u64 = counts.iter().sum();
        let allowed = total < self.rate;
        if allowed {
            let bucket_key = self.bucket_key(key, current);
            let mut pipeline = self.storage.pipeline();
            pipeline.increment(&bucket_key, 1).expire(
                &bucket_key,
                Duration::from_millis(self.window_ms.saturating_add(bucket_ms) as u64),
            );
            for result in self.storage.execute_pipeline(pipeline).await? {
                result?;
            }
            if let Some(last) = counts.last_mut() {
                *last += 1;
            }
            total += 1;
        }

        // Capacity frees up when the oldest occupied bucket leaves the window
        let reset_ms = counts
            .iter()
            .position(|count| *count > 0)
            .map(|offset| (first + offset as i64 + buckets) * bucket_ms)
            .unwrap_or(now_ms.saturating_add(self.window_ms));
        let reset_at = at_millis(reset_ms, now);

        Ok(Decision {
            allowed,
            remaining: self.rate.saturating_sub(total),
            limit: self.rate,
            reset_at,
            retry_at: (!allowed).then_some(reset_at),
        })
    }
}
