use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use engram_write::NewRelation;

use crate::app::AppState;
use crate::error::ApiResult;

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewRelation>,
) -> ApiResult<Json<Value>> {
    let relation = state.relations.create(input)?;
    Ok(Json(json!({ "relation": relation })))
}

#[derive(Deserialize)]
pub struct ListParams {
    pub entity: Option<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(branch): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let relations = state.relations.list(&branch, params.entity.as_deref())?;
    let count = relations.len();
    Ok(Json(json!({ "relations": relations, "count": count })))
}
