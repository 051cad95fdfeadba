use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use engram_core::types::{FactStatus, VerificationStatus};

use crate::app::AppState;
use crate::error::ApiResult;

/// GET /analytics/{branch} — per-branch knowledge profile: fact counts by
/// category and status, confidence average, verification tally, volume of
/// observations, conversations, and messages.
pub async fn branch_analytics(
    State(state): State<Arc<AppState>>,
    Path(branch): Path<String>,
) -> ApiResult<Json<Value>> {
    state.branches.get(&branch)?;

    let facts = state.storage.list_facts(&branch, None, None)?;
    let mut by_category: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_status: BTreeMap<String, u64> = BTreeMap::new();
    let mut verification: BTreeMap<String, u64> = BTreeMap::new();
    let mut confidence_sum = 0.0;
    let mut active = 0u64;

    for fact in &facts {
        *by_category.entry(fact.category.clone()).or_default() += 1;
        *by_status.entry(fact.status.to_string()).or_default() += 1;
        let vstatus = fact.metadata["verification_status"]
            .as_str()
            .and_then(|s| s.parse::<VerificationStatus>().ok())
            .unwrap_or(VerificationStatus::Unverified);
        *verification.entry(vstatus.to_string()).or_default() += 1;
        if fact.status == FactStatus::Active {
            confidence_sum += fact.confidence;
            active += 1;
        }
    }
    let avg_confidence = if active > 0 {
        confidence_sum / active as f64
    } else {
        0.0
    };

    let observations = state.storage.list_observations(&branch, None)?;
    let conversations = state.storage.list_conversations(&branch, None)?;
    let message_count: u64 = conversations.iter().map(|c| c.message_count as u64).sum();

    Ok(Json(json!({
        "branch": branch,
        "facts": {
            "total": facts.len(),
            "active": active,
            "by_category": by_category,
            "by_status": by_status,
            "avg_confidence": avg_confidence,
            "verification": verification,
        },
        "observations": observations.len(),
        "conversations": conversations.len(),
        "messages": message_count,
    })))
}
