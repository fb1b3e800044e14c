//! Error responses of the HTTP surface

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::config::BackendKind;

/// Every per-request failure, rendered as `{"error": code, "message": text}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("too many requests")]
    RateLimited { key: String },

    #[error("{message}")]
    BackendUnavailable {
        backend: BackendKind,
        message: String,
    },

    #[error("{0}")]
    InvalidReplayRequest(String),

    #[error("{0}")]
    ReplayFailed(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Storage(String),

    #[error("{0}")]
    Limiter(String),

    #[error("{0}")]
    ExportFailed(String),

    #[error("{message}")]
    MethodNotAllowed {
        allow: &'static str,
        message: &'static str,
    },
}

impl ApiError {
    pub fn method_not_allowed(allow: &'static str) -> Self {
        ApiError::MethodNotAllowed {
            allow,
            message: "method not allowed",
        }
    }

    /// Machine readable code for the `error` field
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::BackendUnavailable { .. } => "backend_unavailable",
            ApiError::InvalidReplayRequest(_) => "invalid_replay_request",
            ApiError::ReplayFailed(_) => "replay_failed",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Storage(_) => "storage_error",
            ApiError::Limiter(_) => "limiter_error",
            ApiError::ExportFailed(_) => "export_failed",
            ApiError::MethodNotAllowed { .. } => "method_not_allowed",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidReplayRequest(_)
            | ApiError::ReplayFailed(_)
            | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Storage(_) | ApiError::Limiter(_) | ApiError::ExportFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        match &self {
            ApiError::RateLimited { key } => body["key"] = json!(key),
            ApiError::BackendUnavailable { backend, .. } => body["backend"] = json!(backend),
            _ => {}
        }

        let mut response = (self.status(), Json(body)).into_response();
        if let ApiError::MethodNotAllowed { allow, .. } = self {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static(allow));
        }
        response
    }
}
