use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use engram_core::types::{new_id, now_rfc3339, Session, SessionStatus};

use crate::app::AppState;
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct StartBody {
    pub branch: Option<String>,
    pub parent_session_id: Option<String>,
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
    /// Also open a conversation for the session (default true).
    #[serde(default = "default_true")]
    pub open_conversation: bool,
}

fn default_true() -> bool {
    true
}

/// POST /sessions — register a session and (by default) its conversation.
pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartBody>,
) -> ApiResult<Json<Value>> {
    let branch = state.resolve_branch(body.branch.as_deref(), body.parent_session_id.as_deref());
    // Config-level context carriers fill in what the request omits.
    let parent_session_id = body
        .parent_session_id
        .or_else(|| state.config.parent_session.clone());
    let task_id = body.task_id.or_else(|| state.config.task_id.clone());
    let agent_id = body.agent_id.or_else(|| state.config.agent_id.clone());
    let session = Session {
        id: new_id(),
        parent_session_id,
        branch: branch.clone(),
        task_id: task_id.clone(),
        agent_id: agent_id.clone(),
        status: SessionStatus::Active,
        summary: None,
        started_at: now_rfc3339(),
        ended_at: None,
    };
    state.storage.insert_session(&session)?;
    state.active_branches.insert(session.id.clone(), branch.clone());

    let conversation = if body.open_conversation {
        Some(state.messages.open_conversation(
            &branch,
            &session.id,
            None,
            None,
            agent_id,
            task_id,
        )?)
    } else {
        None
    };
    Ok(Json(json!({ "session": session, "conversation": conversation })))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let session = state
        .storage
        .get_session(&id)?
        .ok_or_else(|| engram_core::EngramError::not_found("session", &id))?;
    Ok(Json(json!({ "session": session })))
}

#[derive(Deserialize)]
pub struct EndBody {
    pub summary: Option<String>,
}

/// POST /sessions/{id}/end — close the session and drop its per-session
/// state (the active-branch entry).
pub async fn end(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<EndBody>,
) -> ApiResult<Json<Value>> {
    state.storage.end_session(&id, body.summary.as_deref())?;
    state.active_branches.remove(&id);
    Ok(Json(json!({ "ended": id })))
}

#[derive(Deserialize)]
pub struct SwitchBody {
    pub branch: String,
}

/// POST /sessions/{id}/branch — set the session's active branch.
pub async fn switch_branch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SwitchBody>,
) -> ApiResult<Json<Value>> {
    // The branch must exist before it can become the active target.
    state.branches.get(&body.branch)?;
    state.active_branches.insert(id.clone(), body.branch.clone());
    Ok(Json(json!({ "session": id, "active_branch": body.branch })))
}

/// DELETE /sessions/{id}/state — explicit cleanup of per-session state
/// without ending the session row.
pub async fn clear_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.active_branches.remove(&id);
    Ok(Json(json!({ "cleared": id })))
}
