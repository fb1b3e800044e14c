// src/algorithms/factory.rs

use std::sync::Arc;

use crate::algorithms::{FixedWindow, SharedLimiter, SlidingWindow, TokenBucket};
use crate::clock::SharedClock;
use crate::config::{Algorithm, LimiterSettings, MemoryStoreConfig};
use crate::error::Result;
use crate::storage::MemoryStorage;

/// Builds a standalone limiter over its own in-memory store.
///
/// Settings are validated here as well, since replay hands in settings that
/// never went through [`crate::config::GatewayConfig::validate`].
pub fn build_limiter(
    settings: &LimiterSettings,
    store: &MemoryStoreConfig,
    clock: SharedClock,
) -> Result<SharedLimiter> {
    settings.validate()?;
    let storage = MemoryStorage::new(store.clone(), Arc::clone(&clock));

    let limiter: SharedLimiter = match settings.algorithm {
        Algorithm::TokenBucket => Arc::new(TokenBucket::new(storage, settings, clock)),
        Algorithm::SlidingWindow => Arc::new(SlidingWindow::new(storage, settings, clock)),
        Algorithm::FixedWindow => Arc::new(FixedWindow::new(storage, settings, clock)),
    };
    Ok(limiter)
}
