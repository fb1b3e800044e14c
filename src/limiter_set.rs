// src/limiter_set.rs

//! One sliding window limiter per storage backend, opened side by side.
//!
//! The memory backend must come up; redis and the replicated store may fail
//! independently, in which case the set keeps the reason and reports it to
//! whoever asks for that backend.

use futures::future::{join_all, BoxFuture};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::algorithms::{build_limiter, SharedLimiter, SlidingWindow};
use crate::clock::SharedClock;
use crate::config::{Algorithm, BackendKind, GatewayConfig, LimiterSettings};
use crate::error::{GatewayError, Result, StorageError};
use crate::storage::{CrdtStorage, MemoryStorage, RedisStorage, StorageBackend};

#[derive(Debug)]
struct Backend<S> {
    store: S,
    limiter: SharedLimiter,
}

#[derive(Debug)]
pub struct StorageLimiterSet {
    memory: Backend<MemoryStorage>,
    redis: std::result::Result<Backend<RedisStorage>, GatewayError>,
    crdt: std::result::Result<Backend<CrdtStorage>, GatewayError>,
}

impl StorageLimiterSet {
    /// Opens all three backends concurrently.
    ///
    /// Only a memory failure is returned as an error; the other two are kept
    /// as [`GatewayError::BackendUnavailable`] inside the set.
    pub async fn build(config: &GatewayConfig, clock: SharedClock) -> Result<Self> {
        // Every backend runs the same sliding window so results stay comparable
        let settings = config.limiter.with_algorithm(Algorithm::SlidingWindow);
        settings.validate()?;

        let (memory, redis, crdt) = tokio::join!(
            open_backend::<MemoryStorage>(
                BackendKind::Memory,
                config.storage.memory.clone(),
                &settings,
                clock.clone()
            ),
            open_backend::<RedisStorage>(
                BackendKind::Redis,
                config.storage.redis.clone(),
                &settings,
                clock.clone()
            ),
            open_backend::<CrdtStorage>(
                BackendKind::Crdt,
                config.storage.crdt.clone(),
                &settings,
                clock.clone()
            ),
        );

        let set = Self {
            memory: memory?,
            redis,
            crdt,
        };
        for kind in [BackendKind::Redis, BackendKind::Crdt] {
            if let Err(err) = set.limiter(kind) {
                warn!(backend = kind.as_str(), reason = %err, "storage backend unavailable");
            }
        }
        Ok(set)
    }

    /// The memory backend's limiter, always present
    pub fn memory(&self) -> &SharedLimiter {
        &self.memory.limiter
    }

    pub fn limiter(&self, kind: BackendKind) -> std::result::Result<&SharedLimiter, &GatewayError> {
        match kind {
            BackendKind::Memory => Ok(&self.memory.limiter),
            BackendKind::Redis => self.redis.as_ref().map(|b| &b.limiter),
            BackendKind::Crdt => self.crdt.as_ref().map(|b| &b.limiter),
        }
    }

    pub fn is_available(&self, kind: BackendKind) -> bool {
        self.limiter(kind).is_ok()
    }

    /// Closes every opened store concurrently and reports all failures at once.
    ///
    /// Not bounded in time; callers wrap it in their shutdown deadline.
    pub async fn close(&self) -> Result<()> {
        let mut closes: Vec<BoxFuture<'_, (BackendKind, Result<()>)>> =
            vec![Box::pin(close_store(BackendKind::Memory, &self.memory.store))];
        if let Ok(redis) = &self.redis {
            closes.push(Box::pin(close_store(BackendKind::Redis, &redis.store)));
        }
        if let Ok(crdt) = &self.crdt {
            closes.push(Box::pin(close_store(BackendKind::Crdt, &crdt.store)));
        }

        let failures: Vec<String> = join_all(closes)
            .await
            .into_iter()
            .filter_map(|(kind, result)| result.err().map(|err| format!("{}: {}", kind, err)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Close(failures.join("; ")).into())
        }
    }
}

async fn open_backend<S>(
    kind: BackendKind,
    config: S::Config,
    settings: &LimiterSettings,
    clock: SharedClock,
) -> Result<Backend<S>>
where
    S: StorageBackend + Clone + 'static,
{
    let started = Instant::now();
    let opened = S::open(config, clock.clone()).await;
    crate::storage_op!(kind.as_str(), "open", opened, started.elapsed().as_millis() as u64);

    let store = opened.map_err(|err| GatewayError::BackendUnavailable {
        backend: kind,
        reason: err.to_string(),
    })?;
    let limiter: SharedLimiter = Arc::new(
        SlidingWindow::new(store.clone(), settings, clock).with_namespace(format!("sw:{}", kind)),
    );
    Ok(Backend { store, limiter })
}

async fn close_store<S: StorageBackend>(kind: BackendKind, store: &S) -> (BackendKind, Result<()>) {
    let started = Instant::now();
    let result = store.close().await;
    crate::storage_op!(kind.as_str(), "close", result, started.elapsed().as_millis() as u64);
    (kind, result)
}

/// Limiter guarding the main API routes.
///
/// Memory builds a dedicated limiter with the configured algorithm. Redis and
/// crdt reuse that backend's limiter from the set, falling back to memory
/// when the backend did not open.
pub fn main_limiter(
    config: &GatewayConfig,
    set: &StorageLimiterSet,
    clock: SharedClock,
) -> Result<SharedLimiter> {
    let backend = config.storage.backend;
    if backend != BackendKind::Memory {
        match set.limiter(backend) {
            Ok(limiter) => {
                info!(backend = backend.as_str(), "main limiter uses shared backend");
                return Ok(limiter.clone());
            }
            Err(err) => warn!(
                backend = backend.as_str(),
                reason = %err,
                "backend unavailable, falling back to memory for the main limiter"
            ),
        }
    }
    build_limiter(&config.limiter, &config.storage.memory, clock)
}
