// src/lib.rs

pub mod algorithms;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod limiter_set;
pub mod logging;
pub mod recording;
pub mod replay;
pub mod storage;

#[cfg(test)]
pub mod test_utils;

// Re-export key components for convenience
pub use algorithms::{build_limiter, Decision, Limiter, SharedLimiter};
pub use clock::{Clock, SharedClock, SystemClock, VirtualClock};
pub use config::{Algorithm, BackendKind, ConfigOverrides, GatewayConfig, LimiterSettings};
pub use error::{GatewayError, Result};
pub use limiter_set::StorageLimiterSet;
pub use logging::{init as init_logging, LogFormat};
pub use recording::{RecordingState, TrafficRecord};
pub use replay::{ReplayOptions, ReplayState, Summary};
