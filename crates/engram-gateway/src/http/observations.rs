use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use engram_write::NewObservation;

use crate::app::AppState;
use crate::error::ApiResult;

pub async fn capture(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewObservation>,
) -> ApiResult<Json<Value>> {
    let observation = state.observations.capture(input).await?;
    Ok(Json(json!({ "observation": observation })))
}

#[derive(Deserialize)]
pub struct ListParams {
    pub session_id: Option<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(branch): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let observations = state
        .observations
        .list(&branch, params.session_id.as_deref())?;
    let count = observations.len();
    Ok(Json(json!({ "observations": observations, "count": count })))
}

#[derive(Deserialize)]
pub struct SearchBody {
    pub query: String,
    pub branch: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SearchBody>,
) -> ApiResult<Json<Value>> {
    let results = state
        .search
        .search_observations(&body.query, &body.branch, body.limit)
        .await?;
    Ok(Json(json!({ "results": results })))
}
