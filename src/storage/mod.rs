// src/storage/mod.rs

pub mod crdt;
pub mod memory;
pub mod redis;
pub mod retry;

pub use crdt::CrdtStorage;
pub use memory::MemoryStorage;
pub use redis::{RedisPipeline, RedisStorage};

use super::clock::SharedClock;
use super::error::{Result, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::time::Duration;

// Represents a pipeline of operations to be executed as a batch
pub trait StoragePipeline: Send + Sync {
    // Add a get operation to the pipeline
    fn get(&mut self, key: &str) -> &mut Self;

    // Add a set operation to the pipeline
    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> &mut Self;

    // Add an increment operation to the pipeline
    fn increment(&mut self, key: &str, amount: i64) -> &mut Self;

    // Add an expire operation to the pipeline
    fn expire(&mut self, key: &str, ttl: Duration) -> &mut Self;
}

/// Core trait that all storage backends must implement.
///
/// Counters are stored as ASCII decimal strings on every backend, so a value
/// written by `increment` reads back the same way everywhere.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    // The type of configuration this storage backend accepts
    type Config: Send + Sync;

    // The type of pipeline this storage backend uses
    type Pipeline: StoragePipeline;

    // Opens the backend; expiry decisions read time from `clock`
    async fn open(config: Self::Config, clock: SharedClock) -> Result<Self>
    where
        Self: Sized;

    // Retrieves a value by key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    // Stores a value with a key
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    // Atomically increments a counter
    async fn increment(&self, key: &str, amount: i64) -> Result<i64>;

    // Sets expiration time for a key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    // Checks if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    // Deletes a key
    async fn delete(&self, key: &str) -> Result<bool>;

    // Creates a new pipeline for executing multiple operations
    fn pipeline(&self) -> Self::Pipeline;

    // Executes a pipeline of operations; missing keys yield empty values
    async fn execute_pipeline(&self, pipeline: Self::Pipeline) -> Result<Vec<Result<Vec<u8>>>>;

    // Releases sockets and background tasks
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Pipeline that buffers operations and replays them one by one.
/// Used by the backends that have no native batching.
#[derive(Default)]
pub struct BufferedPipeline {
    operations: Vec<BufferedOp>,
}

enum BufferedOp {
    Get(String),
    Set(String, Vec<u8>, Option<Duration>),
    Increment(String, i64),
    Expire(String, Duration),
}

impl BufferedPipeline {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Runs every buffered operation against `store` in insertion order
    pub(crate) async fn run<S>(self, store: &S) -> Vec<Result<Vec<u8>>>
    where
        S: StorageBackend + ?Sized,
    {
        let mut results = Vec::with_capacity(self.operations.len());
        for op in self.operations {
            let result = match op {
                BufferedOp::Get(key) => store.get(&key).await.map(Option::unwrap_or_default),
                BufferedOp::Set(key, value, ttl) => {
                    store.set(&key, &value, ttl).await.map(|_| b"OK".to_vec())
                }
                BufferedOp::Increment(key, amount) => {
                    store.increment(&key, amount).await.map(encode_counter)
                }
                BufferedOp::Expire(key, ttl) => store
                    .expire(&key, ttl)
                    .await
                    .map(|applied| encode_counter(applied as i64)),
            };
            results.push(result);
        }
        results
    }
}

impl StoragePipeline for BufferedPipeline {
    fn get(&mut self, key: &str) -> &mut Self {
        self.operations.push(BufferedOp::Get(key.to_string()));
        self
    }

    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> &mut Self {
        self.operations
            .push(BufferedOp::Set(key.to_string(), value.to_vec(), ttl));
        self
    }

    fn increment(&mut self, key: &str, amount: i64) -> &mut Self {
        self.operations
            .push(BufferedOp::Increment(key.to_string(), amount));
        self
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> &mut Self {
        self.operations.push(BufferedOp::Expire(key.to_string(), ttl));
        self
    }
}

pub fn encode_counter(value: i64) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Reads a counter; an empty value counts as zero
pub fn decode_counter(bytes: &[u8]) -> Result<i64> {
    if bytes.is_empty() {
        return Ok(0);
    }
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            StorageError::Serialization(format!(
                "value {:?} is not an integer",
                String::from_utf8_lossy(bytes)
            ))
            .into()
        })
}

/// `now + ttl`, or `None` when the sum is out of range
pub(crate) fn deadline(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
}

#[cfg(test)]
mod tests;
