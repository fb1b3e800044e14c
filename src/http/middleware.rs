//! Rate-limit and recording middleware for guarded routes

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

use crate::algorithms::{Decision, SharedLimiter};
use crate::clock::SharedClock;
use crate::http::ApiError;
use crate::recording::{RecordingState, TrafficRecord};

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";
pub const RETRY_AFTER_HEADER: &str = "retry-after";

/// Key used when a request carries no identity at all
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Middleware state for one guarded route group
#[derive(Clone)]
pub struct Guard {
    pub limiter: SharedLimiter,
    pub recording: Arc<RecordingState>,
    pub clock: SharedClock,
}

/// Client identity: `X-API-Key`, then the first `X-Forwarded-For` entry, then
/// the peer address
pub fn client_key(request: &Request) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    key_from_parts(request.headers(), peer)
}

fn key_from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(api_key) = header("x-api-key") {
        return api_key.to_string();
    }
    if let Some(first) = header("x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return first.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Whole seconds until `retry_at`, never less than one
pub fn retry_after_seconds(retry_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u64 {
    let Some(retry_at) = retry_at else {
        return 1;
    };
    let millis = (retry_at - now).num_milliseconds();
    if millis <= 0 {
        return 1;
    }
    ((millis + 999) / 1000) as u64
}

/// Writes the four rate-limit headers for `decision`
pub fn apply_headers(headers: &mut HeaderMap, decision: &Decision, retry_after: u64) {
    let mut set = |name: &'static str, value: HeaderValue| {
        headers.insert(HeaderName::from_static(name), value);
    };
    set(LIMIT_HEADER, HeaderValue::from(decision.limit));
    set(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    set(RESET_HEADER, HeaderValue::from(decision.reset_at.timestamp()));
    set(RETRY_AFTER_HEADER, HeaderValue::from(retry_after));
}

/// Retry-After value for a decision: 0 when allowed
pub fn retry_after_for(decision: &Decision, now: DateTime<Utc>) -> u64 {
    if decision.allowed {
        0
    } else {
        retry_after_seconds(decision.retry_at, now)
    }
}

/// Records the request, then admits or rejects it
pub async fn guard(State(guard): State<Guard>, request: Request, next: Next) -> Response {
    let key = client_key(&request);

    let entry = TrafficRecord {
        timestamp: guard.clock.now(),
        key: key.clone(),
        endpoint: format!("{} {}", request.method(), request.uri().path()),
    };
    if let Err(err) = guard.recording.record(entry) {
        warn!(key = %key, error = %err, "failed to record traffic");
    }

    let started = Instant::now();
    let decision = match guard.limiter.check(&key).await {
        Ok(decision) => decision,
        Err(err) => {
            error!(key = %key, limiter = guard.limiter.name(), error = %err, "rate limit check failed");
            return ApiError::Limiter(err.to_string()).into_response();
        }
    };
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    crate::decision_event!(key.as_str(), guard.limiter.name(), decision, elapsed_ms);

    let retry_after = retry_after_for(&decision, guard.clock.now());
    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        ApiError::RateLimited { key }.into_response()
    };
    apply_headers(response.headers_mut(), &decision, retry_after);
    response
}
