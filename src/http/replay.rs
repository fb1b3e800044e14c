//! Recording control and replay endpoints

use axum::{
    body::Bytes,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::http::{ApiError, AppState};
use crate::replay::{self, ReplayRequest};

/// `POST /api/record/start`
pub async fn start_recording(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.recording.start();
    Json(json!({
        "recording": state.recording.is_enabled(),
        "count": state.recording.len(),
    }))
}

/// `POST /api/record/stop`
pub async fn stop_recording(State(state): State<AppState>) -> Json<serde_json::Value> {
    let records = state.recording.stop();
    Json(json!({
        "recording": false,
        "count": records.len(),
        "records": records,
    }))
}

/// `GET /api/recordings/export`
pub async fn export_recordings(State(state): State<AppState>) -> Result<Response, ApiError> {
    let mut buffer = Vec::new();
    state
        .recording
        .export_json(&mut buffer)
        .map_err(|err| ApiError::ExportFailed(err.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "application/json")], buffer).into_response())
}

/// `POST /api/replay`: replays the posted traffic and caches the summary
pub async fn run_replay(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (options, records) = ReplayRequest::parse(&body, &state.config)
        .map_err(|err| ApiError::InvalidReplayRequest(err.to_string()))?;

    let summary = replay::run(records, &options, state.shutdown.clone())
        .await
        .map_err(|err| ApiError::ReplayFailed(err.to_string()))?;

    state.replays.set(&summary);
    Ok(Json(json!({ "summary": summary })))
}

/// `GET /api/replay/last`
pub async fn last_replay(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let summary = state
        .replays
        .get()
        .ok_or_else(|| ApiError::NotFound("no replay has been run yet".to_string()))?;
    Ok(Json(json!({ "summary": summary })))
}
