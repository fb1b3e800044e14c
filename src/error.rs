// src/error.rs
use thiserror::Error;

use crate::config::BackendKind;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// A configuration field failed to parse or validate
    #[error("invalid {field}: {message}")]
    Config {
        field: &'static str,
        message: String,
    },

    /// Algorithm name outside the supported set
    #[error("unsupported algorithm {0:?}")]
    UnsupportedAlgorithm(String),

    /// Storage backend name outside the supported set
    #[error("unsupported storage backend {0:?}")]
    UnsupportedBackend(String),

    /// A storage backend could not be opened
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable { backend: BackendKind, reason: String },

    /// Replay payload or options were rejected
    #[error("{0}")]
    ReplayInput(String),

    /// Replay stopped by its cancellation signal before finishing
    #[error("replay cancelled after {replayed} of {total} records")]
    ReplayCancelled { replayed: usize, total: usize },

    /// Traffic recorder refused an entry
    #[error("recording error: {0}")]
    Recording(String),

    /// Errors related to the storage backend
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Shorthand for a field-level configuration error
    pub fn config(field: &'static str, message: impl Into<String>) -> Self {
        GatewayError::Config {
            field,
            message: message.into(),
        }
    }
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    RedisConnection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    RedisAuth(String),

    /// Redis command errors
    #[error("Redis command error: {0}")]
    RedisCommand(String),

    /// Data serialization/deserialization errors
    #[error("Data serialization error: {0}")]
    Serialization(String),

    /// The store refused to grow past its configured size
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Operation the backend does not provide
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Gossip socket or peer failures
    #[error("Replication error: {0}")]
    Replication(String),

    /// One or more stores failed to shut down
    #[error("Close failed: {0}")]
    Close(String),
}

// Implement conversions from redis::RedisError to StorageError
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => StorageError::RedisAuth(err.to_string()),
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                // Connection-related errors
                StorageError::RedisConnection(err.to_string())
            }
            _ => StorageError::RedisCommand(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        GatewayError::Storage(err.into())
    }
}

// implement conversions from serde_json::Error to GatewayError
impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Storage(StorageError::Serialization(err.to_string()))
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, GatewayError>;
