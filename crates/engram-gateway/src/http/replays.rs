use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct CreateBody {
    pub branch: Option<String>,
    pub conversation_id: String,
    pub fork_at: u32,
    #[serde(default)]
    pub parameters: Option<Value>,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBody>,
) -> ApiResult<Json<Value>> {
    let branch = state.resolve_branch(body.branch.as_deref(), None);
    let replay = state.conversations.create_replay(
        &branch,
        &body.conversation_id,
        body.fork_at,
        body.parameters.unwrap_or_else(|| json!({})),
    )?;
    Ok(Json(json!({ "replay": replay })))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let replay = state.conversations.get_replay(&id)?;
    Ok(Json(json!({ "replay": replay })))
}

#[derive(Deserialize)]
pub struct ContextParams {
    pub branch: Option<String>,
}

pub async fn context(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ContextParams>,
) -> ApiResult<Json<Value>> {
    let branch = state.resolve_branch(params.branch.as_deref(), None);
    let messages = state.conversations.replay_context(&branch, &id)?;
    let count = messages.len();
    Ok(Json(json!({ "messages": messages, "count": count })))
}

#[derive(Deserialize)]
pub struct CompleteBody {
    pub final_message_ids: Vec<String>,
}

pub async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CompleteBody>,
) -> ApiResult<Json<Value>> {
    state
        .conversations
        .complete_replay(&id, &body.final_message_ids)?;
    Ok(Json(json!({ "completed": id })))
}
