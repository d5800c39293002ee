//! Health / heartbeat endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::state::AppState;

/// Register health-check routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// Heartbeat endpoint.
///
/// Returns `{"status": "ok", "version": "...", "cache": "<backend>"}` with
/// HTTP 200, plus the number of lifecycles still waiting to be finalized.
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status":    "ok",
        "version":   env!("CARGO_PKG_VERSION"),
        "cache":     state.coordinator.cache().backend_name(),
        "in_flight": state.coordinator.in_flight(),
    }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use relay_core::cache::MemoryCache;
    use relay_core::{Coordinator, PersistSettings, TtlPolicy};

    use super::*;
    use crate::config::Config;

    fn state() -> Arc<AppState> {
        let cache = Arc::new(MemoryCache::new(TtlPolicy::never_expires()));
        let coordinator = Arc::new(Coordinator::new(cache, PersistSettings::default()));
        Arc::new(AppState::new(Config::default(), coordinator).unwrap())
    }

    #[tokio::test]
    async fn health_response_has_ok_status() {
        let Json(body) = get_health(State(state())).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["cache"], "memory");
    }

    #[tokio::test]
    async fn health_response_has_version() {
        let Json(body) = get_health(State(state())).await;
        assert!(!body["version"].as_str().unwrap_or("").is_empty());
    }
}
