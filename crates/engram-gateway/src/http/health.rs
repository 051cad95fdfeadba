use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health — liveness probe, returns server metadata and capability
/// flags. Exempt from auth and rate limiting.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "default_branch": state.config.default_branch,
        "fulltext": state.storage.fulltext_enabled(),
        "embedding_provider": state.embedder.name(),
        "embedding_dimension": state.embedder.dimension(),
    }))
}
