// src/algorithms/token_bucket.rs

use crate::algorithms::{at_millis, window_millis, Decision, KeyLocks, Limiter};
use crate::clock::SharedClock;
use crate::config::LimiterSettings;
use crate::error::{Result, StorageError};
use crate::storage::{StorageBackend, StoragePipeline};
use async_trait::async_trait;
use std::time::Duration;

/// Token Bucket rate limiting algorithm
///
/// The bucket holds up to `burst` tokens and refills continuously at `rate`
/// tokens per window. Each request consumes a token, and if there are no
/// tokens available, the request is rejected. Fractional tokens are kept, so
/// slow refill rates are not rounded away between checks.
#[derive(Debug)]
pub struct TokenBucket<S>
where
    S: StorageBackend,
{
    /// Storage backend for persisting bucket state
    storage: S,

    capacity: u64,
    /// Tokens added per window
    rate: f64,
    window_ms: f64,
    clock: SharedClock,
    namespace: String,
    locks: KeyLocks,
}

impl<S> TokenBucket<S>
where
    S: StorageBackend,
{
    pub fn new(storage: S, settings: &LimiterSettings, clock: SharedClock) -> Self {
        Self {
            storage,
            capacity: settings.burst,
            rate: settings.rate as f64,
            window_ms: window_millis(settings.window) as f64,
            clock,
            namespace: "tb".to_string(),
            locks: KeyLocks::default(),
        }
    }

    /// Prefix for every storage key this limiter writes
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Milliseconds needed to gain `tokens`
    fn millis_for(&self, tokens: f64) -> i64 {
        (tokens * self.window_ms / self.rate).ceil() as i64
    }

    /// Tokens gained over `elapsed_ms`
    fn refill(&self, elapsed_ms: f64) -> f64 {
        elapsed_ms * self.rate / self.window_ms
    }

    /// Reads (tokens, last refill ms); a missing bucket starts full
    async fn load_state(&self, tokens_key: &str, refill_key: &str, now_ms: i64) -> Result<(f64, i64)> {
        let mut pipeline = self.storage.pipeline();
        pipeline.get(tokens_key).get(refill_key);
        let mut results = self.storage.execute_pipeline(pipeline).await?.into_iter();

        let tokens = parse_state::<f64>(results.next().transpose()?)?;
        let last_refill = parse_state::<i64>(results.next().transpose()?)?;
        match (tokens, last_refill) {
            (Some(tokens), Some(last_refill)) => Ok((tokens, last_refill)),
            _ => Ok((self.capacity as f64, now_ms)),
        }
    }

    async fn store_state(&self, tokens_key: &str, refill_key: &str, tokens: f64, now_ms: i64) -> Result<()> {
        // Past this point an untouched bucket is full again, so the state can go
        let ttl = Duration::from_millis(self.millis_for(self.capacity as f64).max(1) as u64)
            + Duration::from_secs(1);

        let mut pipeline = self.storage.pipeline();
        pipeline
            .set(tokens_key, tokens.to_string().as_bytes(), Some(ttl))
            .set(refill_key, now_ms.to_string().as_bytes(), Some(ttl));
        for result in self.storage.execute_pipeline(pipeline).await? {
            result?;
        }
        Ok(())
    }
}

// Empty values mean the key is absent
fn parse_state<T: std::str::FromStr>(raw: Option<Vec<u8>>) -> Result<Option<T>> {
    match raw {
        None => Ok(None),
        Some(bytes) if bytes.is_empty() => Ok(None),
        Some(bytes) => std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Some)
            .ok_or_else(|| StorageError::Serialization("corrupt token bucket state".to_string()).into()),
    }
}

#[async_trait]
impl<S> Limiter for TokenBucket<S>
where
    S: StorageBackend,
{
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    async fn check(&self, key: &str) -> Result<Decision> {
        let _guard = self.locks.lock(key).await;

        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let tokens_key = format!("{}:{}:tokens", self.namespace, key);
        let refill_key = format!("{}:{}:refilled_at", self.namespace, key);

        let (stored, last_refill) = self.load_state(&tokens_key, &refill_key, now_ms).await?;
        let elapsed = (now_ms - last_refill).max(0) as f64;
        let capacity = self.capacity as f64;
        let mut tokens = (stored + self.refill(elapsed)).min(capacity);

        let allowed = tokens >= 1.0;
        if allowed {
            tokens -= 1.0;
        }
        self.store_state(&tokens_key, &refill_key, tokens, now_ms).await?;

        let reset_at = at_millis(now_ms + self.millis_for(capacity - tokens), now);
        let retry_at = (!allowed).then(|| at_millis(now_ms + self.millis_for(1.0 - tokens), now));

        Ok(Decision {
            allowed,
            remaining: tokens.floor() as u64,
            limit: self.capacity,
            reset_at,
            retry_at,
        })
    }
}
