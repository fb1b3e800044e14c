// src/algorithms/fixed_window.rs

use crate::algorithms::{at_millis, window_millis, Decision, Limiter};
use crate::clock::SharedClock;
use crate::config::LimiterSettings;
use crate::error::Result;
use crate::storage::StorageBackend;
use async_trait::async_trait;
use std::time::Duration;

/// Fixed Window rate limiting algorithm
///
/// Time is cut into windows aligned to multiples of the window length since
/// the epoch. Each key gets `rate` requests per window; the counter is
/// incremented before the comparison so concurrent checks stay exact on
/// backends with atomic increments.
#[derive(Debug)]
pub struct FixedWindow<S>
where
    S: StorageBackend,
{
    /// Storage backend for persisting window counters
    storage: S,

    rate: u64,
    window_ms: i64,
    clock: SharedClock,
    namespace: String,
}

impl<S> FixedWindow<S>
where
    S: StorageBackend,
{
    pub fn new(storage: S, settings: &LimiterSettings, clock: SharedClock) -> Self {
        Self {
            storage,
            rate: settings.rate,
            window_ms: window_millis(settings.window),
            clock,
            namespace: "fw".to_string(),
        }
    }

    /// Prefix for every storage key this limiter writes
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Start of the window containing `now_ms`
    fn window_start(&self, now_ms: i64) -> i64 {
        now_ms - now_ms.rem_euclid(self.window_ms)
    }
}

#[async_trait]
impl<S> Limiter for FixedWindow<S>
where
    S: StorageBackend,
{
    fn name(&self) -> &'static str {
        "fixed_window"
    }

    async fn check(&self, key: &str) -> Result<Decision> {
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let start = self.window_start(now_ms);
        let end = start.saturating_add(self.window_ms);
        let counter_key = format!("{}:{}:{}", self.namespace, key, start);

        let count = self.storage.increment(&counter_key, 1).await?;
        if count == 1 {
            // Outlive the window slightly so late readers still see it
            let ttl = Duration::from_millis((end - now_ms) as u64) + Duration::from_secs(1);
            self.storage.expire(&counter_key, ttl).await?;
        }

        let count = count.max(0) as u64;
        let allowed = count <= self.rate;
        let reset_at = at_millis(end, now);

        Ok(Decision {
            allowed,
            remaining: self.rate.saturating_sub(count),
            limit: self.rate,
            reset_at,
            retry_at: (!allowed).then_some(reset_at),
        })
    }
}
