//! Gateway error taxonomy.
//!
//! Only request-level failures live here. Command-level failures (an upstream
//! `WRONGTYPE`, wrong arity, ...) are not HTTP errors: they ride inline in
//! the per-command result envelope and the request itself still returns 200.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Request-level gateway failure.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Bearer credential missing or wrong. No command execution happens.
    #[error("Unauthorized")]
    Unauthorized,

    /// The request body or path could not be decoded into commands.
    /// No upstream interaction occurs.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The upstream RESP server could not be reached or the connection broke
    /// mid-request. The borrowed connection is invalidated, never reused.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
