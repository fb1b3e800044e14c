// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Admission-control strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    TokenBucket,
    SlidingWindow,
    FixedWindow,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [
        Algorithm::TokenBucket,
        Algorithm::SlidingWindow,
        Algorithm::FixedWindow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::FixedWindow => "fixed_window",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        Algorithm::ALL
            .into_iter()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| GatewayError::UnsupportedAlgorithm(s.to_string()))
    }
}

/// Where storage-backed limiters keep their counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Memory,
    Redis,
    Crdt,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Memory, BackendKind::Redis, BackendKind::Crdt];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
            BackendKind::Crdt => "crdt",
        }
    }

    /// Shared backends only carry the sliding window counters
    pub fn supports(&self, algorithm: Algorithm) -> bool {
        match self {
            BackendKind::Memory => true,
            BackendKind::Redis | BackendKind::Crdt => algorithm == Algorithm::SlidingWindow,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        BackendKind::ALL
            .into_iter()
            .find(|b| b.as_str() == normalized)
            .ok_or_else(|| GatewayError::UnsupportedBackend(s.to_string()))
    }
}

/// Longest accepted window; keeps every window boundary a valid timestamp
pub const MAX_WINDOW: Duration = Duration::from_secs(1000 * 365 * 24 * 60 * 60);

/// Algorithm parameters shared by live traffic and replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterSettings {
    pub algorithm: Algorithm,

    /// Requests admitted per window
    pub rate: u64,

    #[serde(with = "duration_serde")]
    pub window: Duration,

    /// Token bucket capacity
    pub burst: u64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::SlidingWindow,
            rate: 10,
            window: Duration::from_secs(60),
            burst: 10,
        }
    }
}

impl LimiterSettings {
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(GatewayError::config("rate", "must be > 0"));
        }
        if self.window.is_zero() {
            return Err(GatewayError::config("window", "must be > 0"));
        }
        if self.window > MAX_WINDOW {
            return Err(GatewayError::config(
                "window",
                format!("must be at most {}", humantime::format_duration(MAX_WINDOW)),
            ));
        }
        if self.burst == 0 {
            return Err(GatewayError::config("burst", "must be > 0"));
        }
        Ok(())
    }

    /// Same limits under a different algorithm
    pub fn with_algorithm(&self, algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address; a leading ':' means every interface
    pub addr: String,

    /// Upper bound on closing storage backends at shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Start capturing traffic as soon as the server is up
    pub enabled: bool,

    /// Entries kept before further records are rejected
    pub max_records: usize,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_records: 100_000,
        }
    }
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Maximum number of entries to store
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(with = "duration_serde")]
    pub cleanup_interval: Duration,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            use_background_task: true,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,

    /// Extra connection attempts after the first one fails
    pub max_retries: usize,

    /// Bound on each connection attempt
    #[serde(with = "duration_serde")]
    pub dial_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            max_retries: 2,
            dial_timeout: Duration::from_secs(2),
        }
    }
}

impl RedisConfig {
    pub fn url(&self) -> String {
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Connection URL with the password masked, for logs
    pub fn redacted_url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Configuration for the gossip-replicated counter store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrdtConfig {
    /// Replica identity; generated when left empty
    pub node_id: String,

    /// UDP address the replica listens on
    pub bind_addr: String,

    /// UDP addresses of the other replicas
    pub peers: Vec<String>,

    #[serde(with = "duration_serde")]
    pub gossip_interval: Duration,
}

impl Default for CrdtConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            bind_addr: "127.0.0.1:0".to_string(),
            peers: Vec::new(),
            gossip_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend the main limiter runs on
    pub backend: BackendKind,
    pub memory: MemoryStoreConfig,
    pub redis: RedisConfig,
    pub crdt: CrdtConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            memory: MemoryStoreConfig::default(),
            redis: RedisConfig::default(),
            crdt: CrdtConfig::default(),
        }
    }
}

/// Fully resolved runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub limiter: LimiterSettings,
    pub recording: RecordingConfig,
    pub storage: StorageConfig,
}

impl GatewayConfig {
    /// Reads a JSON config file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config("config", format!("read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            GatewayError::config("config", format!("parse {}: {}", path.display(), e))
        })
    }

    /// Defaults, then the optional file, then `env`, then `flags`, then validation
    pub fn resolve(
        path: Option<&Path>,
        env: &ConfigOverrides,
        flags: &ConfigOverrides,
    ) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        env.apply(&mut config)?;
        flags.apply(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// [`GatewayConfig::resolve`] with overrides read from the process environment
    pub fn load(path: Option<&Path>, flags: &ConfigOverrides) -> Result<Self> {
        Self::resolve(path, &ConfigOverrides::from_env()?, flags)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.addr.trim().is_empty() {
            return Err(GatewayError::config("addr", "is required"));
        }
        self.limiter.validate()?;

        let backend = self.storage.backend;
        if !backend.supports(self.limiter.algorithm) {
            return Err(GatewayError::config(
                "algorithm",
                format!(
                    "algorithm {:?} is unsupported with {} backend; use {:?}",
                    self.limiter.algorithm.as_str(),
                    backend,
                    Algorithm::SlidingWindow.as_str()
                ),
            ));
        }

        if self.storage.memory.max_entries == 0 {
            return Err(GatewayError::config("storage.memory.max_entries", "must be > 0"));
        }
        if self.storage.memory.cleanup_interval.is_zero() {
            return Err(GatewayError::config(
                "storage.memory.cleanup_interval",
                "must be > 0",
            ));
        }
        if self.storage.crdt.gossip_interval.is_zero() {
            return Err(GatewayError::config(
                "storage.crdt.gossip_interval",
                "must be > 0",
            ));
        }
        if self.recording.max_records == 0 {
            return Err(GatewayError::config("recording.max_records", "must be > 0"));
        }
        Ok(())
    }

    /// Address handed to the listener
    pub fn bind_addr(&self) -> String {
        let addr = self.server.addr.trim();
        if addr.starts_with(':') {
            format!("0.0.0.0{}", addr)
        } else {
            addr.to_string()
        }
    }
}

/// Optional values layered on top of a config; one instance per source (env, flags)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub addr: Option<String>,
    pub algorithm: Option<String>,
    pub rate: Option<i64>,
    pub window: Option<String>,
    pub burst: Option<i64>,
    pub storage_backend: Option<String>,
    pub record: Option<bool>,
    pub redis_host: Option<String>,
    pub redis_port: Option<u16>,
    pub redis_password: Option<String>,
    pub crdt_node_id: Option<String>,
    pub crdt_bind_addr: Option<String>,
    pub crdt_peers: Option<Vec<String>>,
}

impl ConfigOverrides {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds overrides from a variable lookup; blank values are ignored
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Self {
            addr: get("ADDR"),
            algorithm: get("ALGORITHM"),
            rate: get("RATE").map(|v| parse_env("rate", &v)).transpose()?,
            window: get("WINDOW"),
            burst: get("BURST").map(|v| parse_env("burst", &v)).transpose()?,
            storage_backend: get("STORAGE_BACKEND"),
            record: get("RECORD").map(|v| parse_env("record", &v)).transpose()?,
            redis_host: get("REDIS_HOST"),
            redis_port: get("REDIS_PORT")
                .map(|v| parse_env("storage.redis.port", &v))
                .transpose()?,
            redis_password: get("REDIS_PASSWORD"),
            crdt_node_id: get("CRDT_NODE_ID"),
            crdt_bind_addr: get("CRDT_BIND_ADDR"),
            crdt_peers: get("CRDT_PEERS").map(|v| split_csv(&v)),
        })
    }

    pub fn apply(&self, config: &mut GatewayConfig) -> Result<()> {
        if let Some(addr) = &self.addr {
            config.server.addr = addr.clone();
        }
        self.apply_limiter(&mut config.limiter)?;
        if let Some(backend) = &self.storage_backend {
            config.storage.backend = backend
                .parse()
                .map_err(|_| GatewayError::config("storage_backend", format!("unknown backend {:?}", backend)))?;
        }
        if let Some(record) = self.record {
            config.recording.enabled = record;
        }

        let storage = &mut config.storage;
        if let Some(host) = &self.redis_host {
            storage.redis.host = host.clone();
        }
        if let Some(port) = self.redis_port {
            storage.redis.port = port;
        }
        if let Some(password) = &self.redis_password {
            storage.redis.password = Some(password.clone());
        }
        if let Some(node_id) = &self.crdt_node_id {
            storage.crdt.node_id = node_id.clone();
        }
        if let Some(bind_addr) = &self.crdt_bind_addr {
            storage.crdt.bind_addr = bind_addr.clone();
        }
        if let Some(peers) = &self.crdt_peers {
            storage.crdt.peers = peers.clone();
        }
        Ok(())
    }

    /// Applies only the algorithm/rate/window/burst overrides
    pub fn apply_limiter(&self, settings: &mut LimiterSettings) -> Result<()> {
        if let Some(algorithm) = &self.algorithm {
            settings.algorithm = algorithm.parse().map_err(|_| {
                GatewayError::config("algorithm", format!("unknown algorithm {:?}", algorithm))
            })?;
        }
        if let Some(rate) = self.rate {
            settings.rate = positive("rate", rate)?;
        }
        if let Some(window) = &self.window {
            settings.window = parse_duration("window", window)?;
        }
        if let Some(burst) = self.burst {
            settings.burst = positive("burst", burst)?;
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: i64) -> Result<u64> {
    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| GatewayError::config(field, "must be > 0"))
}

fn parse_env<T: FromStr>(field: &'static str, raw: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| GatewayError::config(field, format!("{:?}: {}", raw, e)))
}

/// Parses a human-readable duration such as `500ms`, `1m` or `1h30m`
pub fn parse_duration(field: &'static str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim())
        .map_err(|e| GatewayError::config(field, format!("{:?}: {}", raw, e)))
}

/// Splits a comma separated list, dropping blank entries
pub fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// Durations are written as humantime strings ("1m", "250ms")
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests;
