pub mod chat;
pub mod conversations;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Routes nested under `/v1` (OpenAI-compatible).
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(chat::router(state))
        .merge(conversations::router())
}
