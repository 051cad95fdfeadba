use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::app::AppState;
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct CreateBody {
    pub branch: Option<String>,
    pub label: String,
    #[serde(default)]
    pub native: bool,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBody>,
) -> ApiResult<Json<Value>> {
    let branch = state.resolve_branch(body.branch.as_deref(), None);
    let snapshot = state.snapshots.create(&branch, &body.label, body.native)?;
    Ok(Json(json!({
        "snapshot": { "id": snapshot.id, "branch": snapshot.branch, "label": snapshot.label,
                      "created_at": snapshot.created_at },
    })))
}

#[derive(Deserialize)]
pub struct ListParams {
    pub branch: Option<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let snapshots = state.snapshots.list(params.branch.as_deref())?;
    // payloads are large; listing returns metadata only
    let summaries: Vec<Value> = snapshots
        .iter()
        .map(|s| {
            json!({ "id": s.id, "branch": s.branch, "label": s.label, "created_at": s.created_at })
        })
        .collect();
    let count = summaries.len();
    Ok(Json(json!({ "snapshots": summaries, "count": count })))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let snapshot = state.snapshots.get(&id)?;
    Ok(Json(json!({ "snapshot": snapshot })))
}

pub async fn restore(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.snapshots.restore(&id, &CancellationToken::new())?;
    Ok(Json(json!({ "restored": id })))
}

#[derive(Deserialize)]
pub struct TimeTravelBody {
    pub branch: Option<String>,
    /// RFC3339 timestamp to read as of.
    pub at: String,
}

pub async fn time_travel(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TimeTravelBody>,
) -> ApiResult<Json<Value>> {
    let branch = state.resolve_branch(body.branch.as_deref(), None);
    let facts = state.snapshots.time_travel(&branch, &body.at)?;
    Ok(Json(json!({ "facts": facts, "count": facts.len(), "as_of": body.at })))
}
