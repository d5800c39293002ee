//! Unified server error type.
//!
//! Handlers and middleware return `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON-body HTTP
//! response with an appropriate status code.
//!
//! Internal errors (cache, upstream transport) are logged with full detail
//! but only a generic message is returned to the caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_core::CacheError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the conversation cache.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// The upstream chat API could not be reached.
    #[error("upstream error: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),

            ServerError::Upstream(e) => {
                error!(error = %e, "upstream request failed");
                (StatusCode::BAD_GATEWAY, "upstream unavailable".to_owned())
            }
            ServerError::Cache(e) => {
                error!(error = %e, "cache error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned())
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned())
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}
