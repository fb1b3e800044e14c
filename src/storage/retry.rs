// src/storage/retry.rs

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

/// Retry schedule for backend connection attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first failure
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Scale each delay by a random factor in [0.5, 1.0)
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            attempt: 0,
            policy: self.clone(),
        }
    }
}

/// Iterator-like delay generator for one retry sequence
#[derive(Debug)]
pub struct Backoff {
    attempt: usize,
    policy: RetryPolicy,
}

impl Backoff {
    /// Delay before the next attempt, or `None` once retries are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        let exp = self.attempt as i32;
        self.attempt += 1;

        let base_ms = self.policy.initial_backoff.as_millis() as f64;
        let capped_ms = (base_ms * self.policy.multiplier.powi(exp))
            .min(self.policy.max_backoff.as_millis() as f64);

        let delay_ms = if self.policy.jitter {
            capped_ms * (rand::random::<f64>() * 0.5 + 0.5)
        } else {
            capped_ms
        };
        Some(Duration::from_millis(delay_ms as u64))
    }
}

/// Runs `op` until it succeeds or the policy gives up, returning the last error
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.backoff();
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(operation = what, error = %err, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
        }
    }
}
