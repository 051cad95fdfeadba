use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiResult;

// ── Bundles ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateBundleBody {
    pub name: String,
    pub branch: Option<String>,
    #[serde(default)]
    pub verified_only: bool,
}

pub async fn create_bundle(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBundleBody>,
) -> ApiResult<Json<Value>> {
    let branch = state.resolve_branch(body.branch.as_deref(), None);
    let bundle = state.bundles.create(&body.name, &branch, body.verified_only)?;
    Ok(Json(json!({
        "bundle": { "id": bundle.id, "name": bundle.name, "verified_only": bundle.verified_only,
                    "created_at": bundle.created_at },
    })))
}

pub async fn get_bundle(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let bundle = state.bundles.get(&id)?;
    Ok(Json(json!({ "bundle": bundle })))
}

#[derive(Deserialize)]
pub struct ImportBody {
    pub target_branch: String,
}

pub async fn import_bundle(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ImportBody>,
) -> ApiResult<Json<Value>> {
    let counts = state.bundles.import(&id, &body.target_branch)?;
    Ok(Json(json!({ "imported": counts })))
}

// ── Handoffs ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateHandoffBody {
    pub source_branch: String,
    pub target_branch: String,
    #[serde(default = "default_handoff_type")]
    pub handoff_type: String,
}

fn default_handoff_type() -> String {
    "context_transfer".to_string()
}

pub async fn create_handoff(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateHandoffBody>,
) -> ApiResult<Json<Value>> {
    let handoff = state
        .handoffs
        .create(&body.source_branch, &body.target_branch, &body.handoff_type)?;
    Ok(Json(json!({ "handoff": handoff })))
}

pub async fn get_handoff(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let handoff = state.handoffs.get(&id)?;
    Ok(Json(json!({ "handoff": handoff })))
}

// ── Templates ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateTemplateBody {
    pub name: String,
    pub source_branch: Option<String>,
    #[serde(default)]
    pub task_types: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTemplateBody>,
) -> ApiResult<Json<Value>> {
    let branch = state.resolve_branch(body.source_branch.as_deref(), None);
    let template = state
        .templates
        .create(&body.name, &branch, body.task_types, body.tags)?;
    Ok(Json(json!({
        "template": { "name": template.name, "version": template.version,
                      "source_branch": template.source_branch, "status": template.status },
    })))
}

pub async fn list_templates(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let templates = state.templates.list()?;
    let summaries: Vec<Value> = templates
        .iter()
        .map(|t| {
            json!({ "name": t.name, "version": t.version, "status": t.status,
                    "task_types": t.task_types, "tags": t.tags })
        })
        .collect();
    let count = summaries.len();
    Ok(Json(json!({ "templates": summaries, "count": count })))
}

pub async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let template = state.templates.get(&name)?;
    Ok(Json(json!({ "template": template })))
}

#[derive(Deserialize)]
pub struct ApplyBody {
    pub branch_name: String,
    pub parent: Option<String>,
}

pub async fn apply_template(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<ApplyBody>,
) -> ApiResult<Json<Value>> {
    let parent = body
        .parent
        .unwrap_or_else(|| state.config.default_branch.clone());
    let branch = state.templates.apply(&name, &body.branch_name, &parent)?;
    Ok(Json(json!({ "branch": branch })))
}

pub async fn deprecate_template(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    state.templates.deprecate(&name)?;
    Ok(Json(json!({ "deprecated": name })))
}
