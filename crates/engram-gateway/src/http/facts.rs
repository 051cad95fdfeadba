use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use engram_core::types::{EntityKind, FactStatus};
use engram_search::SearchQuery;
use engram_write::NewFact;

use crate::app::AppState;
use crate::error::ApiResult;

pub async fn create_fact(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewFact>,
) -> ApiResult<Json<Value>> {
    let fact = state.facts.create(input).await?;
    Ok(Json(json!({ "fact": fact })))
}

pub async fn get_fact(
    State(state): State<Arc<AppState>>,
    Path((branch, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let fact = state.facts.get(&branch, &id)?;
    Ok(Json(json!({ "fact": fact })))
}

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<FactStatus>,
    pub category: Option<String>,
}

pub async fn list_facts(
    State(state): State<Arc<AppState>>,
    Path(branch): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let facts = state
        .facts
        .list(&branch, params.status, params.category.as_deref())?;
    let count = facts.len();
    Ok(Json(json!({ "facts": facts, "count": count })))
}

pub async fn search_facts(
    State(state): State<Arc<AppState>>,
    Json(query): Json<SearchQuery>,
) -> ApiResult<Json<Value>> {
    let results = state.search.search(&query).await?;
    Ok(Json(json!({ "results": results })))
}

#[derive(Deserialize)]
pub struct CrossBranchQuery {
    pub query: String,
    pub branches: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

pub async fn search_cross_branch(
    State(state): State<Arc<AppState>>,
    Json(q): Json<CrossBranchQuery>,
) -> ApiResult<Json<Value>> {
    let results = state
        .search
        .search_cross_branch(&q.query, &q.branches, q.limit)
        .await?;
    Ok(Json(json!({ "results": results })))
}

#[derive(Deserialize)]
pub struct SupersedeBody {
    pub text: String,
    pub confidence: Option<f64>,
}

pub async fn supersede_fact(
    State(state): State<Arc<AppState>>,
    Path((branch, id)): Path<(String, String)>,
    Json(body): Json<SupersedeBody>,
) -> ApiResult<Json<Value>> {
    let fact = state
        .facts
        .supersede(&branch, &id, body.text, body.confidence)
        .await?;
    Ok(Json(json!({ "fact": fact })))
}

pub async fn archive_fact(
    State(state): State<Arc<AppState>>,
    Path((branch, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    state.facts.archive(&branch, &id)?;
    Ok(Json(json!({ "archived": id })))
}

#[derive(Deserialize)]
pub struct BackfillBody {
    pub branch: String,
    pub entity: EntityKind,
    #[serde(default = "default_backfill_limit")]
    pub limit: usize,
}

fn default_backfill_limit() -> usize {
    100
}

pub async fn backfill(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BackfillBody>,
) -> ApiResult<Json<Value>> {
    let filled = engram_write::backfill::backfill_embeddings(
        &state.storage,
        &state.embedder,
        body.entity,
        &body.branch,
        body.limit,
    )
    .await?;
    Ok(Json(json!({ "backfilled": filled })))
}
