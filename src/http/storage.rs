//! Storage backend endpoints: per-backend decisions, a side by side
//! comparison and a small key/value demo over a memory store.

use axum::{
    body::Bytes,
    extract::{Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::algorithms::{Decision, SharedLimiter};
use crate::config::BackendKind;
use crate::http::middleware::{apply_headers, client_key, retry_after_for};
use crate::http::{ApiError, AppState};
use crate::storage::StorageBackend;

const CRDT_NOTE: &str = "experimental: eventual consistency may cause minor discrepancies";

fn note_for(backend: BackendKind) -> Option<&'static str> {
    (backend == BackendKind::Crdt).then_some(CRDT_NOTE)
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

async fn timed_check(limiter: &SharedLimiter, key: &str) -> Result<(Decision, f64), ApiError> {
    let started = Instant::now();
    let decision = limiter
        .check(key)
        .await
        .map_err(|err| ApiError::Limiter(err.to_string()))?;
    let latency_ms = started.elapsed().as_micros() as f64 / 1000.0;
    crate::decision_event!(key, limiter.name(), decision, latency_ms);
    Ok((decision, latency_ms))
}

/// `GET /api/storage/{backend}`
pub async fn backend_decision(
    state: AppState,
    backend: BackendKind,
    request: Request,
) -> Result<Response, ApiError> {
    let limiter = state
        .limiters
        .limiter(backend)
        .map_err(|err| ApiError::BackendUnavailable {
            backend,
            message: err.to_string(),
        })?;

    let key = client_key(&request);
    let (decision, latency_ms) = timed_check(limiter, &key).await?;
    let retry_after = retry_after_for(&decision, state.clock.now());

    let mut body = json!({
        "backend": backend,
        "key": key,
        "allowed": decision.allowed,
        "remaining": decision.remaining,
        "limit": decision.limit,
        "reset_at": rfc3339(decision.reset_at),
        "latency_ms": latency_ms,
        "retry_after": retry_after.to_string(),
    });
    if let Some(note) = note_for(backend) {
        body["note"] = json!(note);
    }

    let status = if decision.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    let mut response = (status, Json(body)).into_response();
    apply_headers(response.headers_mut(), &decision, retry_after);
    Ok(response)
}

#[derive(Debug, Default, Serialize)]
pub struct CompareResult {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_at: String,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
}

impl CompareResult {
    fn agrees_with(&self, other: &CompareResult) -> bool {
        self.allowed == other.allowed
            && self.remaining == other.remaining
            && self.reset_at == other.reset_at
    }
}

/// `GET /api/storage/compare`: one check per backend for the same key
pub async fn compare(State(state): State<AppState>, request: Request) -> Json<serde_json::Value> {
    let key = client_key(&request);

    let mut results = Vec::with_capacity(BackendKind::ALL.len());
    for backend in BackendKind::ALL {
        let note = note_for(backend);
        let result = match state.limiters.limiter(backend) {
            Err(err) => CompareResult {
                error: Some(err.to_string()),
                note,
                ..Default::default()
            },
            Ok(limiter) => match timed_check(limiter, &key).await {
                Ok((decision, latency_ms)) => CompareResult {
                    allowed: decision.allowed,
                    remaining: decision.remaining,
                    reset_at: rfc3339(decision.reset_at),
                    latency_ms,
                    error: None,
                    note,
                },
                Err(err) => CompareResult {
                    error: Some(err.to_string()),
                    note,
                    ..Default::default()
                },
            },
        };
        results.push((backend, result));
    }

    // Backends that failed take no part in the agreement check
    let answered: Vec<&CompareResult> = results
        .iter()
        .map(|(_, result)| result)
        .filter(|result| result.error.is_none())
        .collect();
    let consistent = answered
        .split_first()
        .map_or(true, |(first, rest)| rest.iter().all(|r| first.agrees_with(r)));

    let results: serde_json::Map<String, serde_json::Value> = results
        .into_iter()
        .map(|(backend, result)| (backend.to_string(), json!(result)))
        .collect();

    let limiter = &state.config.limiter;
    Json(json!({
        "request": {
            "key": key,
            "limit": limiter.rate,
            "window": humantime::format_duration(limiter.window).to_string(),
        },
        "results": results,
        "consistent": consistent,
    }))
}

#[derive(Debug, Deserialize)]
struct WriteRequest {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    ttl: String,
}

#[derive(Debug, Deserialize)]
struct IncrementRequest {
    #[serde(default)]
    key: String,
    #[serde(default)]
    delta: i64,
    #[serde(default)]
    ttl: String,
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::InvalidRequest("invalid JSON body".to_string()))
}

fn required_key(key: &str) -> Result<String, ApiError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ApiError::InvalidRequest("field 'key' is required".to_string()));
    }
    Ok(key.to_string())
}

// Blank means no expiry
fn optional_ttl(raw: &str) -> Result<Duration, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(raw).map_err(|err| {
        ApiError::InvalidRequest(format!("ttl must be a non-negative duration, got {:?}: {}", raw, err))
    })
}

fn ttl_label(ttl: Duration) -> String {
    humantime::format_duration(ttl).to_string()
}

fn storage_error(err: crate::error::GatewayError) -> ApiError {
    ApiError::Storage(err.to_string())
}

/// `GET /api/storage/demo?key=...`
pub async fn demo_read(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = params
        .get("key")
        .map(|key| key.trim())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("query parameter 'key' is required".to_string()))?;

    let value = state.demo_store.get(key).await.map_err(storage_error)?;
    let mut body = json!({
        "operation": "read",
        "key": key,
        "exists": value.is_some(),
    });
    if let Some(value) = value {
        body["value"] = json!(String::from_utf8_lossy(&value));
    }
    Ok(Json(body))
}

/// `PUT /api/storage/demo` with `{key, value, ttl}`
pub async fn demo_write(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request: WriteRequest = decode(&body)?;
    let key = required_key(&request.key)?;
    let ttl = optional_ttl(&request.ttl)?;

    state
        .demo_store
        .set(&key, request.value.as_bytes(), (!ttl.is_zero()).then_some(ttl))
        .await
        .map_err(storage_error)?;

    Ok(Json(json!({
        "operation": "write",
        "key": key,
        "value": request.value,
        "ttl": ttl_label(ttl),
    })))
}

/// `POST /api/storage/demo` with `{key, delta, ttl}`; delta defaults to 1
pub async fn demo_increment(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request: IncrementRequest = decode(&body)?;
    let key = required_key(&request.key)?;
    let ttl = optional_ttl(&request.ttl)?;
    let delta = if request.delta == 0 { 1 } else { request.delta };

    let store = &state.demo_store;
    let value = store.increment(&key, delta).await.map_err(storage_error)?;
    if !ttl.is_zero() {
        store.expire(&key, ttl).await.map_err(storage_error)?;
    }

    Ok(Json(json!({
        "operation": "increment",
        "key": key,
        "value": value,
        "delta": delta,
        "ttl": ttl_label(ttl),
    })))
}

pub async fn demo_method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed {
        allow: "GET, PUT, POST",
        message: "use GET (read), PUT (write), POST (increment)",
    }
}
