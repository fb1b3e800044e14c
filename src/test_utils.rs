// src/test_utils.rs

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{SharedClock, VirtualClock};
use crate::config::{Algorithm, GatewayConfig, LimiterSettings, MemoryStoreConfig, StorageConfig};
use crate::recording::TrafficRecord;
use crate::storage::MemoryStorage;

/// Fixed starting point for every virtual clock in the test suite
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 8, 10, 0, 0).unwrap()
}

pub fn virtual_clock() -> Arc<VirtualClock> {
    Arc::new(VirtualClock::new(start_time()))
}

pub fn shared_clock() -> SharedClock {
    virtual_clock()
}

pub fn settings(algorithm: Algorithm, rate: u64, window: Duration, burst: u64) -> LimiterSettings {
    LimiterSettings {
        algorithm,
        rate,
        window,
        burst,
    }
}

/// Memory store settings without the background sweeper
pub fn memory_config() -> MemoryStoreConfig {
    MemoryStoreConfig {
        max_entries: 10_000,
        use_background_task: false,
        cleanup_interval: Duration::from_secs(60),
    }
}

pub fn memory_store(clock: &Arc<VirtualClock>) -> MemoryStorage {
    MemoryStorage::new(memory_config(), clock.clone())
}

/// Storage settings where redis is unreachable and the replica gossips alone
pub fn offline_storage() -> StorageConfig {
    let mut storage = StorageConfig {
        memory: memory_config(),
        ..Default::default()
    };
    storage.redis.port = 1;
    storage.redis.max_retries = 0;
    storage.redis.dial_timeout = Duration::from_millis(200);
    storage.crdt.bind_addr = "127.0.0.1:0".to_string();
    storage.crdt.gossip_interval = Duration::from_millis(50);
    storage
}

/// Gateway config with a small limit, for HTTP and limiter set tests
pub fn gateway_config(algorithm: Algorithm, rate: u64, burst: u64) -> GatewayConfig {
    let mut config = GatewayConfig {
        limiter: settings(algorithm, rate, Duration::from_secs(60), burst),
        storage: offline_storage(),
        ..Default::default()
    };
    config.server.shutdown_timeout = Duration::from_secs(1);
    config
}

pub fn record(offset_secs: i64, key: &str, endpoint: &str) -> TrafficRecord {
    TrafficRecord {
        timestamp: start_time() + chrono::Duration::seconds(offset_secs),
        key: key.to_string(),
        endpoint: endpoint.to_string(),
    }
}

/// Request carrying a peer address, as `into_make_service_with_connect_info` would
pub fn request(method: Method, uri: &str, body: Body) -> Request<Body> {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 40_000))));
    request
}

pub fn get(uri: &str) -> Request<Body> {
    request(Method::GET, uri, Body::empty())
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    request(Method::POST, uri, Body::from(body.to_string()))
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
