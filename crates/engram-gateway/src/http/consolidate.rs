use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use engram_core::types::ConsolidationLevel;
use engram_core::EngramError;

use crate::app::AppState;
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct RunBody {
    pub level: ConsolidationLevel,
    pub branch: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
}

/// POST /consolidate — dispatch one consolidation run by level.
pub async fn run(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunBody>,
) -> ApiResult<Json<Value>> {
    let branch = state.resolve_branch(body.branch.as_deref(), body.session_id.as_deref());
    let cancel = CancellationToken::new();

    match body.level {
        ConsolidationLevel::Session => {
            let session_id = body.session_id.ok_or_else(|| {
                EngramError::invalid("session_id", "required for session-level consolidation")
            })?;
            let record = state
                .consolidation
                .consolidate_session(&branch, &session_id, &cancel)?;
            Ok(Json(json!({ "record": record })))
        }
        ConsolidationLevel::Agent => {
            let record =
                state
                    .consolidation
                    .consolidate_agent(&branch, body.agent_id.as_deref(), &cancel)?;
            Ok(Json(json!({ "record": record })))
        }
        ConsolidationLevel::Task => {
            let result = state.consolidation.consolidate_task(&branch)?;
            Ok(Json(json!({
                "record": result.record,
                "durable": result.durable,
                "ephemeral_count": result.ephemeral.len(),
            })))
        }
    }
}

#[derive(Deserialize)]
pub struct HistoryParams {
    pub branch: Option<String>,
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Value>> {
    let records = state.consolidation.history(params.branch.as_deref())?;
    let count = records.len();
    Ok(Json(json!({ "records": records, "count": count })))
}
