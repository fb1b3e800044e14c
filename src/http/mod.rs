// src/http/mod.rs

//! HTTP surface of the gateway.
//!
//! Guarded endpoints get their [`middleware::Guard`] through the method
//! router's `route_layer`, so only routed verbs are recorded and rate
//! limited. A wrong verb on a guarded path is answered with 405 without
//! touching the limiter or the recorder.

pub mod error;
pub mod middleware;
pub mod replay;
pub mod storage;


pub use error::ApiError;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, MethodRouter},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;

use crate::algorithms::{build_limiter, SharedLimiter};
use crate::clock::SharedClock;
use crate::config::{Algorithm, BackendKind, GatewayConfig};
use crate::error::Result;
use crate::limiter_set::{main_limiter, StorageLimiterSet};
use crate::recording::RecordingState;
use crate::replay::ReplayState;
use crate::storage::MemoryStorage;
use middleware::Guard;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub clock: SharedClock,
    pub limiters: Arc<StorageLimiterSet>,
    pub recording: Arc<RecordingState>,
    pub replays: Arc<ReplayState>,
    /// Scratch store behind `/api/storage/demo`
    pub demo_store: MemoryStorage,
    /// Flips to `true` when the server shuts down; in-flight replays stop
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        clock: SharedClock,
        limiters: Arc<StorageLimiterSet>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let recording = RecordingState::new(config.recording.max_records, config.recording.enabled);
        let demo_store = MemoryStorage::new(config.storage.memory.clone(), clock.clone());
        Self {
            config: Arc::new(config),
            clock,
            limiters,
            recording: Arc::new(recording),
            replays: Arc::new(ReplayState::new()),
            demo_store,
            shutdown,
        }
    }

    fn guard(&self, limiter: SharedLimiter) -> Guard {
        Guard {
            limiter,
            recording: self.recording.clone(),
            clock: self.clock.clone(),
        }
    }
}

/// Answers any verb other than the routed ones with 405
fn only(route: MethodRouter<AppState>, allow: &'static str) -> MethodRouter<AppState> {
    route.fallback(move || async move { ApiError::method_not_allowed(allow) })
}

/// Records and limits the routed verbs only; the 405 fallback is added after
/// the layer so it stays outside the guard
fn guarded(route: MethodRouter<AppState>, guard: &Guard, allow: &'static str) -> MethodRouter<AppState> {
    only(
        route.route_layer(axum::middleware::from_fn_with_state(
            guard.clone(),
            middleware::guard,
        )),
        allow,
    )
}

fn backend_route(backend: BackendKind) -> MethodRouter<AppState> {
    only(
        get(move |State(state): State<AppState>, request: Request| {
            storage::backend_decision(state, backend, request)
        }),
        "GET",
    )
}

/// Builds the full router.
///
/// Fails only when one of the limiters cannot be built from the configured
/// settings.
pub fn router(state: AppState) -> Result<Router> {
    let config = &state.config;
    let main = main_limiter(config, &state.limiters, state.clock.clone())?;

    let main_guard = state.guard(main);

    let mut router = Router::new()
        .route("/health", only(get(health), "GET"))
        .route("/public", only(get(public), "GET"))
        .route("/api/profile", guarded(get(profile), &main_guard, "GET"))
        .route("/api/orders", guarded(post(create_order), &main_guard, "POST"));

    for algorithm in Algorithm::ALL {
        let limiter = build_limiter(
            &config.limiter.with_algorithm(algorithm),
            &config.storage.memory,
            state.clock.clone(),
        )?;
        let path = format!("/api/{}", algorithm.as_str().replace('_', "-"));
        let endpoint = get(move || async move {
            Json(json!({ "algorithm": algorithm.as_str(), "status": "allowed" }))
        });
        router = router.route(&path, guarded(endpoint, &state.guard(limiter), "GET"));
    }

    let router = router
        .route("/api/storage/memory", backend_route(BackendKind::Memory))
        .route("/api/storage/redis", backend_route(BackendKind::Redis))
        .route("/api/storage/crdt", backend_route(BackendKind::Crdt))
        .route("/api/storage/compare", only(get(storage::compare), "GET"))
        .route(
            "/api/storage/demo",
            get(storage::demo_read)
                .put(storage::demo_write)
                .post(storage::demo_increment)
                .fallback(storage::demo_method_not_allowed),
        )
        .route("/api/record/start", only(post(replay::start_recording), "POST"))
        .route("/api/record/stop", only(post(replay::stop_recording), "POST"))
        .route("/api/recordings/export", only(get(replay::export_recordings), "GET"))
        .route("/api/replay", only(post(replay::run_replay), "POST"))
        .route("/api/replay/last", only(get(replay::last_replay), "GET"))
        .fallback(|| async { ApiError::NotFound("route not found".to_string()) })
        .with_state(state);

    Ok(router)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn public() -> Json<serde_json::Value> {
    Json(json!({ "service": "replaygate", "message": "public endpoint" }))
}

async fn profile() -> Json<serde_json::Value> {
    Json(json!({ "id": "demo-user", "name": "Replaygate Demo" }))
}

async fn create_order(State(state): State<AppState>) -> impl IntoResponse {
    let nanos = state.clock.now().timestamp_nanos_opt().unwrap_or_default();
    (
        StatusCode::CREATED,
        Json(json!({ "order_id": format!("ord_{}", nanos), "status": "created" })),
    )
}
