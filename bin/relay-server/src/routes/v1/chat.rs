//! OpenAI-compatible chat-completion proxy.
//!
//! The request body is forwarded verbatim to the configured upstream and the
//! upstream response is streamed back unchanged. Capture of the reply happens
//! in [`crate::middleware::capture`], layered on this route only.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::middleware;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use tracing::debug;

use crate::error::ServerError;
use crate::middleware::capture::capture_middleware;
use crate::state::AppState;

/// Register chat-completion routes.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat/completions", post(chat_completions))
        .route_layer(middleware::from_fn_with_state(state, capture_middleware))
}

/// OpenAI chat completions (`POST /v1/chat/completions`).
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServerError> {
    let url = upstream_endpoint(&state.config.upstream_url);
    debug!(%url, bytes = body.len(), "forwarding chat completion");

    let mut upstream = state
        .http
        .post(&url)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body);
    for name in [header::AUTHORIZATION, header::ACCEPT] {
        if let Some(value) = headers.get(&name) {
            upstream = upstream.header(name, value.clone());
        }
    }

    let resp = upstream.send().await?;

    let mut builder = Response::builder().status(resp.status());
    if let Some(content_type) = resp.headers().get(header::CONTENT_TYPE) {
        builder = builder.header(header::CONTENT_TYPE, content_type.clone());
    }
    builder
        .body(Body::from_stream(resp.bytes_stream()))
        .map_err(|e| ServerError::Internal(format!("failed to build proxied response: {e}")))
}

fn upstream_endpoint(base: &str) -> String {
    format!("{}/v1/chat/completions", base.trim_end_matches('/'))
}
