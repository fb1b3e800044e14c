// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Pipeline};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::SharedClock;
use crate::config::RedisConfig;
use crate::error::{GatewayError, Result, StorageError};
use crate::storage::retry::{retry, RetryPolicy};
use crate::storage::{encode_counter, StorageBackend, StoragePipeline};

// Redis rejects a zero TTL, so sub-millisecond durations round up
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Redis pipeline implementation
pub struct RedisPipeline {
    pipeline: Pipeline,
}

impl RedisPipeline {
    fn new() -> Self {
        Self {
            pipeline: Pipeline::new(),
        }
    }
}

impl StoragePipeline for RedisPipeline {
    fn get(&mut self, key: &str) -> &mut Self {
        self.pipeline.cmd("GET").arg(key);
        self
    }

    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> &mut Self {
        if let Some(ttl) = ttl {
            self.pipeline
                .cmd("PSETEX")
                .arg(key)
                .arg(ttl_millis(ttl))
                .arg(value);
        } else {
            self.pipeline.cmd("SET").arg(key).arg(value);
        }
        self
    }

    fn increment(&mut self, key: &str, amount: i64) -> &mut Self {
        self.pipeline.cmd("INCRBY").arg(key).arg(amount);
        self
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> &mut Self {
        self.pipeline
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl));
        self
    }
}

/// Redis-backed store. Redis owns expiry, so the injected clock is not consulted.
pub struct RedisStorage {
    connection: Arc<tokio::sync::Mutex<ConnectionManager>>,
    config: RedisConfig,
}

// The password must never reach the logs
impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("url", &self.config.redacted_url())
            .field("db", &self.config.db)
            .finish()
    }
}

impl Clone for RedisStorage {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            config: self.config.clone(),
        }
    }
}

impl RedisStorage {
    /// Connects to Redis, bounding each attempt by the dial timeout and
    /// retrying with exponential backoff up to `max_retries` times
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url().as_str())
            .map_err(|e| StorageError::RedisConnection(e.to_string()))?;

        let policy = RetryPolicy::with_retries(config.max_retries);
        let connection_manager = retry(&policy, "redis connect", || {
            let client = client.clone();
            let config = &config;
            async move {
                match tokio::time::timeout(config.dial_timeout, ConnectionManager::new(client))
                    .await
                {
                    Ok(result) => result.map_err(GatewayError::from),
                    Err(_) => Err(StorageError::RedisConnection(format!(
                        "connection to {} timed out after {:?}",
                        config.redacted_url(),
                        config.dial_timeout
                    ))
                    .into()),
                }
            }
        })
        .await?;

        Ok(Self {
            connection: Arc::new(tokio::sync::Mutex::new(connection_manager)),
            config,
        })
    }

    /// Ping Redis to check health with timeout
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.lock().await;
        let ping_future = redis::AsyncCommands::ping::<String>(&mut *conn);

        let result = match tokio::time::timeout(self.config.dial_timeout, ping_future).await {
            Ok(inner_result) => inner_result?,
            Err(_) => {
                return Err(StorageError::RedisCommand(format!(
                    "PING timed out after {:?}",
                    self.config.dial_timeout
                ))
                .into());
            }
        };

        if result == "PONG" {
            Ok(())
        } else {
            Err(StorageError::RedisCommand(format!("unexpected PING reply: {}", result)).into())
        }
    }
}

#[async_trait]
impl StorageBackend for RedisStorage {
    type Config = RedisConfig;
    type Pipeline = RedisPipeline;

    async fn open(config: Self::Config, _clock: SharedClock) -> Result<Self> {
        let storage = Self::connect(config).await?;
        storage.ping().await?;
        Ok(storage)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection.lock().await;
        let result: Option<Vec<u8>> = conn.get(key).await?;
        Ok(result)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection.lock().await;
        match ttl {
            Some(ttl) => {
                let _: () = conn.pset_ex(key, value, ttl_millis(ttl)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        let mut conn = self.connection.lock().await;
        let result: i64 = conn.incr(key, amount).await?;
        Ok(result)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        let result: bool = conn.pexpire(key, ttl_millis(ttl) as i64).await?;
        Ok(result)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        let result: bool = conn.exists(key).await?;
        Ok(result)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        let result: i64 = conn.del(key).await?;
        Ok(result > 0)
    }

    fn pipeline(&self) -> Self::Pipeline {
        RedisPipeline::new()
    }

    async fn execute_pipeline(&self, pipeline: Self::Pipeline) -> Result<Vec<Result<Vec<u8>>>> {
        let mut conn = self.connection.lock().await;
        let results: Vec<redis::Value> = pipeline.pipeline.query_async(&mut *conn).await?;

        // Integers come back as decimal strings to match the other backends
        Ok(results
            .into_iter()
            .map(|value| match value {
                redis::Value::Nil => Ok(vec![]),
                redis::Value::Int(i) => Ok(encode_counter(i)),
                redis::Value::BulkString(bytes) => Ok(bytes),
                redis::Value::SimpleString(s) => Ok(s.into_bytes()),
                redis::Value::Okay => Ok(b"OK".to_vec()),
                redis::Value::Boolean(b) => Ok(encode_counter(b as i64)),
                redis::Value::Double(d) => Ok(d.to_string().into_bytes()),
                other => Err(StorageError::Serialization(format!(
                    "unsupported Redis value {:?}",
                    other
                ))
                .into()),
            })
            .collect())
    }
}
