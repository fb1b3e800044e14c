// src/storage/memory.rs

// In-process storage backend. Expiry is judged against the injected clock,
// so a virtual clock drives TTLs deterministically.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

use crate::clock::SharedClock;
use crate::config::MemoryStoreConfig;
use crate::error::{Result, StorageError};
use crate::storage::{
    decode_counter, deadline, encode_counter, BufferedPipeline, StorageBackend,
};

type Entries = HashMap<String, MemoryEntry>;

/// Entry in the in-memory storage
#[derive(Debug)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory storage backend implementation
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    data: Arc<RwLock<Entries>>,
    config: MemoryStoreConfig,
    clock: SharedClock,
    cleanup_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MemoryStorage {
    /// Creates a new in-memory storage. The background sweeper only starts
    /// when called inside a tokio runtime.
    pub fn new(config: MemoryStoreConfig, clock: SharedClock) -> Self {
        let data = Arc::new(RwLock::new(HashMap::with_capacity(
            config.max_entries.min(10_000),
        )));

        let cleanup_task = match tokio::runtime::Handle::try_current() {
            Ok(handle) if config.use_background_task => Some(handle.spawn(Self::sweep(
                Arc::downgrade(&data),
                Arc::clone(&clock),
                config.cleanup_interval,
            ))),
            _ => None,
        };

        Self {
            data,
            config,
            clock,
            cleanup_task: Arc::new(Mutex::new(cleanup_task)),
        }
    }

    // Periodically drops expired entries; exits once the store is gone
    async fn sweep(data: Weak<RwLock<Entries>>, clock: SharedClock, every: Duration) {
        let mut interval = time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(entries) = data.upgrade() else {
                break;
            };
            Self::purge_expired(&mut entries.write(), clock.now());
        }
    }

    fn purge_expired(entries: &mut Entries, now: DateTime<Utc>) {
        entries.retain(|_, entry| entry.is_live(now));
    }

    /// Entries held, including expired ones the sweeper has not reached yet
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Makes room for `key`, failing when the store is full of live entries
    fn reserve(&self, entries: &mut Entries, key: &str, now: DateTime<Utc>) -> Result<()> {
        if entries.len() < self.config.max_entries || entries.contains_key(key) {
            return Ok(());
        }
        Self::purge_expired(entries, now);
        if entries.len() >= self.config.max_entries {
            return Err(StorageError::CapacityExceeded(format!(
                "memory store holds {} entries",
                self.config.max_entries
            ))
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    type Config = MemoryStoreConfig;
    type Pipeline = BufferedPipeline;

    async fn open(config: Self::Config, clock: SharedClock) -> Result<Self> {
        Ok(Self::new(config, clock))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        let data = self.data.read();
        Ok(data
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now();
        let mut data = self.data.write();
        self.reserve(&mut data, key, now)?;

        data.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                expires_at: ttl.and_then(|ttl| deadline(now, ttl)),
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        let now = self.clock.now();
        let mut data = self.data.write();

        // Expired counters restart from zero without a TTL
        let (current, expires_at) = match data.get(key).filter(|e| e.is_live(now)) {
            Some(entry) => (decode_counter(&entry.value)?, entry.expires_at),
            None => (0, None),
        };
        self.reserve(&mut data, key, now)?;

        let updated = current.checked_add(amount).ok_or_else(|| {
            StorageError::Serialization(format!("increment of {:?} overflows", key))
        })?;
        data.insert(
            key.to_string(),
            MemoryEntry {
                value: encode_counter(updated),
                expires_at,
            },
        );
        Ok(updated)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let mut data = self.data.write();

        match data.get_mut(key).filter(|e| e.is_live(now)) {
            Some(entry) => {
                entry.expires_at = deadline(now, ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self.data.read().get(key).is_some_and(|e| e.is_live(now)))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .data
            .write()
            .remove(key)
            .is_some_and(|e| e.is_live(now)))
    }

    fn pipeline(&self) -> Self::Pipeline {
        BufferedPipeline::default()
    }

    async fn execute_pipeline(&self, pipeline: Self::Pipeline) -> Result<Vec<Result<Vec<u8>>>> {
        Ok(pipeline.run(self).await)
    }

    async fn close(&self) -> Result<()> {
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
        Ok(())
    }
}
