use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use engram_branch::{CreateBranchOptions, MergeRequest};
use engram_core::types::BranchStatus;

use crate::app::AppState;
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct CreateBody {
    pub name: String,
    pub parent: Option<String>,
    #[serde(flatten)]
    pub options: CreateBranchOptions,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBody>,
) -> ApiResult<Json<Value>> {
    let parent = body
        .parent
        .unwrap_or_else(|| state.config.default_branch.clone());
    let branch = state.branches.create(&body.name, &parent, body.options)?;
    Ok(Json(json!({ "branch": branch })))
}

#[derive(Deserialize)]
pub struct ListParams {
    /// Comma-separated status filter, e.g. "active,merged".
    pub statuses: Option<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let statuses: Option<Vec<BranchStatus>> = params.statuses.map(|s| {
        s.split(',')
            .filter_map(|part| part.trim().parse().ok())
            .collect()
    });
    let branches = state.branches.list(statuses.as_deref())?;
    let count = branches.len();
    Ok(Json(json!({ "branches": branches, "count": count })))
}

pub async fn archive(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    state.branches.archive(&name)?;
    Ok(Json(json!({ "archived": name })))
}

#[derive(Deserialize)]
pub struct DiffBody {
    pub source: String,
    pub target: String,
}

pub async fn diff(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DiffBody>,
) -> ApiResult<Json<Value>> {
    let diff = state.branches.diff(&body.source, &body.target)?;
    Ok(Json(json!({ "diff": diff })))
}

pub async fn diff_count(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DiffBody>,
) -> ApiResult<Json<Value>> {
    let counts = state.branches.diff_count(&body.source, &body.target)?;
    Ok(Json(json!({ "counts": counts })))
}

pub async fn merge(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MergeRequest>,
) -> ApiResult<Json<Value>> {
    // Registered so /stop-style tooling could cancel long merges.
    let token = CancellationToken::new();
    let key = format!("merge:{}:{}", request.source, request.target);
    state.active_operations.insert(key.clone(), token.clone());
    let result = state.merges.merge(&request, &token).await;
    state.active_operations.remove(&key);
    let record = result?;
    Ok(Json(json!({ "merge": record })))
}

#[derive(Deserialize)]
pub struct HistoryParams {
    pub target: Option<String>,
}

pub async fn merge_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Value>> {
    let records = state.merges.history(params.target.as_deref())?;
    let count = records.len();
    Ok(Json(json!({ "merges": records, "count": count })))
}
