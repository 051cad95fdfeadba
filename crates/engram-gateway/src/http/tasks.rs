use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use engram_core::types::ObjectiveStatus;

use crate::app::AppState;
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct CreateBody {
    pub name: String,
    pub description: Option<String>,
    pub task_type: Option<String>,
    #[serde(default)]
    pub objectives: Vec<String>,
    pub parent_branch: Option<String>,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBody>,
) -> ApiResult<Json<Value>> {
    let parent = body
        .parent_branch
        .unwrap_or_else(|| state.config.default_branch.clone());
    let (task, branch) = state.tasks.create_task(
        &body.name,
        body.description,
        body.task_type,
        body.objectives,
        &parent,
    )?;
    Ok(Json(json!({ "task": task, "branch": branch })))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let task = state.tasks.get_task(&id)?;
    Ok(Json(json!({ "task": task })))
}

#[derive(Deserialize)]
pub struct AssignBody {
    pub agent_id: String,
    pub role: Option<String>,
}

pub async fn assign_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AssignBody>,
) -> ApiResult<Json<Value>> {
    let branch = state
        .tasks
        .assign_agent(&id, &body.agent_id, body.role.as_deref())?;
    Ok(Json(json!({ "branch": branch })))
}

pub async fn complete_agent(
    State(state): State<Arc<AppState>>,
    Path((id, agent_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let record = state
        .tasks
        .complete_agent(&id, &agent_id, &CancellationToken::new())?;
    Ok(Json(json!({ "record": record })))
}

#[derive(Deserialize)]
pub struct CompleteBody {
    #[serde(default)]
    pub merge: bool,
    #[serde(default = "default_require_verified")]
    pub require_verified: bool,
}

fn default_require_verified() -> bool {
    true
}

pub async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CompleteBody>,
) -> ApiResult<Json<Value>> {
    let completion = state
        .tasks
        .complete_task(&id, body.merge, body.require_verified, &CancellationToken::new())
        .await?;
    Ok(Json(json!({
        "record": completion.consolidation.record,
        "durable_count": completion.consolidation.durable.len(),
        "ephemeral_count": completion.consolidation.ephemeral.len(),
        "merge": completion.merge,
    })))
}

#[derive(Deserialize)]
pub struct ObjectiveBody {
    pub status: ObjectiveStatus,
}

pub async fn update_objective(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(String, usize)>,
    Json(body): Json<ObjectiveBody>,
) -> ApiResult<Json<Value>> {
    let task = state.tasks.update_objective(&id, index, body.status)?;
    Ok(Json(json!({ "task": task })))
}
