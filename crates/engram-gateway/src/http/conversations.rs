use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use engram_write::NewMessage;

use crate::app::AppState;
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct OpenBody {
    pub branch: Option<String>,
    pub session_id: String,
    pub title: Option<String>,
    pub model: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
}

pub async fn open(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OpenBody>,
) -> ApiResult<Json<Value>> {
    let branch = state.resolve_branch(body.branch.as_deref(), Some(&body.session_id));
    let conversation = state.messages.open_conversation(
        &branch,
        &body.session_id,
        body.title,
        body.model,
        body.agent_id,
        body.task_id,
    )?;
    Ok(Json(json!({ "conversation": conversation })))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((branch, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let conversation = state
        .storage
        .get_conversation(&branch, &id)?
        .ok_or_else(|| engram_core::EngramError::not_found("conversation", &id))?;
    Ok(Json(json!({ "conversation": conversation })))
}

pub async fn close(
    State(state): State<Arc<AppState>>,
    Path((branch, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    state.messages.close_conversation(&branch, &id)?;
    Ok(Json(json!({ "closed": id })))
}

pub async fn messages(
    State(state): State<Arc<AppState>>,
    Path((branch, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let messages = state.messages.list(&branch, &id)?;
    let count = messages.len();
    Ok(Json(json!({ "messages": messages, "count": count })))
}

pub async fn append_message(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewMessage>,
) -> ApiResult<Json<Value>> {
    let message = state.messages.append(input).await?;
    Ok(Json(json!({ "message": message })))
}

#[derive(Deserialize)]
pub struct ForkBody {
    pub at_seq: u32,
}

pub async fn fork(
    State(state): State<Arc<AppState>>,
    Path((branch, id)): Path<(String, String)>,
    Json(body): Json<ForkBody>,
) -> ApiResult<Json<Value>> {
    let fork = state.conversations.fork(&branch, &id, body.at_seq)?;
    Ok(Json(json!({ "conversation": fork })))
}

#[derive(Deserialize)]
pub struct CherryPickBody {
    pub target_branch: String,
    pub from_seq: Option<u32>,
    pub to_seq: Option<u32>,
}

pub async fn cherry_pick(
    State(state): State<Arc<AppState>>,
    Path((branch, id)): Path<(String, String)>,
    Json(body): Json<CherryPickBody>,
) -> ApiResult<Json<Value>> {
    let range = match (body.from_seq, body.to_seq) {
        (Some(from), Some(to)) => Some((from, to)),
        (None, None) => None,
        _ => {
            return Err(engram_core::EngramError::invalid(
                "range",
                "from_seq and to_seq must be given together",
            )
            .into())
        }
    };
    let copy = state
        .conversations
        .cherry_pick(&branch, &id, &body.target_branch, range)?;
    Ok(Json(json!({ "conversation": copy })))
}

#[derive(Deserialize)]
pub struct SemanticDiffBody {
    pub branch_a: String,
    pub conversation_a: String,
    pub branch_b: String,
    pub conversation_b: String,
}

pub async fn semantic_diff(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SemanticDiffBody>,
) -> ApiResult<Json<Value>> {
    let diff = state.semantic_diff.diff(
        &body.branch_a,
        &body.conversation_a,
        &body.branch_b,
        &body.conversation_b,
    )?;
    Ok(Json(json!({ "diff": diff })))
}
