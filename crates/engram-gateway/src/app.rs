use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use engram_branch::{BranchEngine, MergeEngine};
use engram_consolidate::ConsolidationEngine;
use engram_conversation::{ConversationEngine, SemanticDiffEngine};
use engram_core::config::EngramConfig;
use engram_embed::EmbeddingProvider;
use engram_exchange::{BundleEngine, HandoffEngine, TemplateEngine};
use engram_search::SearchEngine;
use engram_snapshot::SnapshotEngine;
use engram_storage::Storage;
use engram_task::TaskEngine;
use engram_verify::{LlmJudge, OpenAiJudge, VerificationEngine};
use engram_write::{FactEngine, MessageEngine, ObservationEngine, RelationEngine};

use crate::rate_limit::RateLimiter;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: EngramConfig,
    pub storage: Arc<Storage>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub facts: FactEngine,
    pub observations: ObservationEngine,
    pub messages: MessageEngine,
    pub relations: RelationEngine,
    pub search: SearchEngine,
    pub branches: Arc<BranchEngine>,
    pub merges: Arc<MergeEngine>,
    pub consolidation: Arc<ConsolidationEngine>,
    pub verification: VerificationEngine,
    pub snapshots: SnapshotEngine,
    pub conversations: ConversationEngine,
    pub semantic_diff: SemanticDiffEngine,
    pub tasks: TaskEngine,
    pub bundles: BundleEngine,
    pub handoffs: HandoffEngine,
    pub templates: TemplateEngine,
    /// Per-session active branch, deleted on session close.
    pub active_branches: DashMap<String, String>,
    /// In-flight long operations: caller key -> cancellation token.
    pub active_operations: DashMap<String, CancellationToken>,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: EngramConfig, storage: Arc<Storage>) -> Self {
        let embedder: Arc<dyn EmbeddingProvider> = engram_embed::from_config(&config).into();

        // The judge is optional; without an API key verification falls back
        // to heuristics everywhere.
        let judge: Option<Arc<dyn LlmJudge>> = config
            .llm_api_key
            .as_ref()
            .filter(|key| !key.is_empty())
            .map(|key| {
                Arc::new(OpenAiJudge::new(key.clone(), config.llm_base_url.clone()))
                    as Arc<dyn LlmJudge>
            });

        let branches = Arc::new(BranchEngine::new(storage.clone()));
        let merges = Arc::new(MergeEngine::new(storage.clone(), embedder.clone()));
        let consolidation = Arc::new(ConsolidationEngine::new(storage.clone()));
        let limiter = RateLimiter::new(config.rate_limit);

        Self {
            facts: FactEngine::new(storage.clone(), embedder.clone()),
            observations: ObservationEngine::new(storage.clone(), embedder.clone()),
            messages: MessageEngine::new(storage.clone(), embedder.clone()),
            relations: RelationEngine::new(storage.clone()),
            search: SearchEngine::new(storage.clone(), embedder.clone()),
            verification: VerificationEngine::new(storage.clone(), judge),
            snapshots: SnapshotEngine::new(storage.clone()),
            conversations: ConversationEngine::new(storage.clone()),
            semantic_diff: SemanticDiffEngine::new(storage.clone()),
            tasks: TaskEngine::new(
                storage.clone(),
                branches.clone(),
                consolidation.clone(),
                merges.clone(),
            ),
            bundles: BundleEngine::new(storage.clone()),
            handoffs: HandoffEngine::new(storage.clone()),
            templates: TemplateEngine::new(storage.clone(), branches.clone()),
            branches,
            merges,
            consolidation,
            active_branches: DashMap::new(),
            active_operations: DashMap::new(),
            limiter,
            embedder,
            storage,
            config,
        }
    }

    /// Resolve the branch a request acts on: explicit value, else the
    /// session's active branch, else the configured default.
    pub fn resolve_branch(&self, explicit: Option<&str>, session_id: Option<&str>) -> String {
        if let Some(branch) = explicit {
            return branch.to_string();
        }
        if let Some(sid) = session_id {
            if let Some(active) = self.active_branches.get(sid) {
                return active.value().clone();
            }
        }
        self.config.default_branch.clone()
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        // facts
        .route("/facts", post(crate::http::facts::create_fact))
        .route("/facts/search", post(crate::http::facts::search_facts))
        .route("/facts/search/cross-branch", post(crate::http::facts::search_cross_branch))
        .route("/facts/backfill", post(crate::http::facts::backfill))
        .route("/facts/{branch}/{id}", get(crate::http::facts::get_fact))
        .route("/facts/{branch}/{id}/supersede", post(crate::http::facts::supersede_fact))
        .route("/facts/{branch}/{id}/archive", post(crate::http::facts::archive_fact))
        .route("/facts/{branch}", get(crate::http::facts::list_facts))
        // observations
        .route("/observations", post(crate::http::observations::capture))
        .route("/observations/search", post(crate::http::observations::search))
        .route("/observations/{branch}", get(crate::http::observations::list))
        // relations
        .route("/relations", post(crate::http::relations::create))
        .route("/relations/{branch}", get(crate::http::relations::list))
        // conversations & messages
        .route("/conversations", post(crate::http::conversations::open))
        .route("/conversations/{branch}/{id}", get(crate::http::conversations::get))
        .route("/conversations/{branch}/{id}/close", post(crate::http::conversations::close))
        .route("/conversations/{branch}/{id}/messages", get(crate::http::conversations::messages))
        .route("/conversations/{branch}/{id}/fork", post(crate::http::conversations::fork))
        .route(
            "/conversations/{branch}/{id}/cherry-pick",
            post(crate::http::conversations::cherry_pick),
        )
        .route("/conversations/semantic-diff", post(crate::http::conversations::semantic_diff))
        .route("/messages", post(crate::http::conversations::append_message))
        // replays
        .route("/replays", post(crate::http::replays::create))
        .route("/replays/{id}", get(crate::http::replays::get))
        .route("/replays/{id}/context", get(crate::http::replays::context))
        .route("/replays/{id}/complete", post(crate::http::replays::complete))
        // branches & merging
        .route("/branches", post(crate::http::branches::create).get(crate::http::branches::list))
        .route("/branches/{name}/archive", post(crate::http::branches::archive))
        .route("/branches/diff", post(crate::http::branches::diff))
        .route("/branches/diff-count", post(crate::http::branches::diff_count))
        .route("/branches/merge", post(crate::http::branches::merge))
        .route("/branches/merge-history", get(crate::http::branches::merge_history))
        // snapshots & time travel
        .route("/snapshots", post(crate::http::snapshots::create).get(crate::http::snapshots::list))
        .route("/snapshots/{id}", get(crate::http::snapshots::get))
        .route("/snapshots/{id}/restore", post(crate::http::snapshots::restore))
        .route("/time-travel", post(crate::http::snapshots::time_travel))
        // consolidation
        .route("/consolidate", post(crate::http::consolidate::run))
        .route("/consolidate/history", get(crate::http::consolidate::history))
        // verification & merge gate
        .route("/verify/{branch}/{id}", post(crate::http::verify::verify_fact))
        .route("/verify/{branch}", post(crate::http::verify::batch_verify))
        .route("/verify/{branch}/{id}/set", post(crate::http::verify::set_verification))
        .route("/merge-gate/{branch}", get(crate::http::verify::merge_gate))
        // tasks
        .route("/tasks", post(crate::http::tasks::create))
        .route("/tasks/{id}", get(crate::http::tasks::get))
        .route("/tasks/{id}/agents", post(crate::http::tasks::assign_agent))
        .route("/tasks/{id}/agents/{agent_id}/complete", post(crate::http::tasks::complete_agent))
        .route("/tasks/{id}/complete", post(crate::http::tasks::complete))
        .route("/tasks/{id}/objectives/{index}", post(crate::http::tasks::update_objective))
        // bundles, handoffs, templates
        .route("/bundles", post(crate::http::exchange::create_bundle))
        .route("/bundles/{id}", get(crate::http::exchange::get_bundle))
        .route("/bundles/{id}/import", post(crate::http::exchange::import_bundle))
        .route("/handoffs", post(crate::http::exchange::create_handoff))
        .route("/handoffs/{id}", get(crate::http::exchange::get_handoff))
        .route(
            "/templates",
            post(crate::http::exchange::create_template).get(crate::http::exchange::list_templates),
        )
        .route("/templates/{name}", get(crate::http::exchange::get_template))
        .route("/templates/{name}/apply", post(crate::http::exchange::apply_template))
        .route("/templates/{name}/deprecate", post(crate::http::exchange::deprecate_template))
        // sessions
        .route("/sessions", post(crate::http::sessions::start))
        .route("/sessions/{id}", get(crate::http::sessions::get))
        .route("/sessions/{id}/end", post(crate::http::sessions::end))
        .route("/sessions/{id}/branch", post(crate::http::sessions::switch_branch))
        .route("/sessions/{id}/state", delete(crate::http::sessions::clear_state))
        // analytics
        .route("/analytics/{branch}", get(crate::http::analytics::branch_analytics))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::guard,
        ))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
