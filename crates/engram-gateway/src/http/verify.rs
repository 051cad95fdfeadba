use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use engram_core::types::VerificationStatus;
use engram_verify::can_merge;

use crate::app::AppState;
use crate::error::ApiResult;

pub async fn verify_fact(
    State(state): State<Arc<AppState>>,
    Path((branch, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let outcome = state.verification.verify_fact(&branch, &id).await?;
    Ok(Json(json!({
        "fact_id": outcome.fact_id,
        "verdict": outcome.verdict,
        "scores": outcome.scores,
        "scorer": outcome.scorer,
    })))
}

pub async fn batch_verify(
    State(state): State<Arc<AppState>>,
    Path(branch): Path<String>,
) -> ApiResult<Json<Value>> {
    let outcomes = state
        .verification
        .batch_verify(&branch, &CancellationToken::new())
        .await?;
    let summary: Vec<Value> = outcomes
        .iter()
        .map(|o| json!({ "fact_id": o.fact_id, "verdict": o.verdict }))
        .collect();
    let count = summary.len();
    Ok(Json(json!({ "verified": summary, "count": count })))
}

#[derive(Deserialize)]
pub struct SetBody {
    pub status: VerificationStatus,
}

pub async fn set_verification(
    State(state): State<Arc<AppState>>,
    Path((branch, id)): Path<(String, String)>,
    Json(body): Json<SetBody>,
) -> ApiResult<Json<Value>> {
    state.verification.set_verification(&branch, &id, body.status)?;
    Ok(Json(json!({ "fact_id": id, "status": body.status })))
}

#[derive(Deserialize)]
pub struct GateParams {
    #[serde(default = "default_require_verified")]
    pub require_verified: bool,
}

fn default_require_verified() -> bool {
    true
}

pub async fn merge_gate(
    State(state): State<Arc<AppState>>,
    Path(branch): Path<String>,
    Query(params): Query<GateParams>,
) -> ApiResult<Json<Value>> {
    let (ok, counts) = can_merge(&state.storage, &branch, params.require_verified)?;
    Ok(Json(json!({ "can_merge": ok, "counts": counts })))
}
