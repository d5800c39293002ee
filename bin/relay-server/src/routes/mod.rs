//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - Trace middleware (per-request span and trace id)
//! - Health / heartbeat route
//! - OpenAI-compatible `/v1` routes, with reply capture on chat completions

mod health;
mod v1;

use std::sync::Arc;

use axum::Router;
use axum::middleware;

use crate::middleware::trace;
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/v1", v1::router(state.clone()))
        .layer(middleware::from_fn_with_state(state.clone(), trace::trace_middleware))
        .with_state(state)
}
