//! Read access to cached conversation values.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/conversations/{id}", get(get_conversation))
}

/// `GET /v1/conversations/{id}` – the value last stored for `id`.
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    match state.coordinator.cache().read(&id).await? {
        Some(value) => Ok(Json(json!({ "id": id, "value": value }))),
        None => Err(ServerError::NotFound(format!("conversation {id} not found"))),
    }
}
