//! End-to-end scenarios across the engines, wired the same way the
//! gateway wires them: one shared store, mock embeddings, no judge.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use engram_branch::{BranchEngine, CreateBranchOptions, MergeEngine, MergeRequest};
use engram_consolidate::ConsolidationEngine;
use engram_conversation::{ConversationEngine, DiffVerdict, SemanticDiffEngine};
use engram_core::types::{
    ConflictPolicy, MergeStrategy, MessageRole, ObservationType, Outcome, VerificationStatus,
};
use engram_embed::{EmbeddingProvider, MockEmbedding};
use engram_search::{SearchEngine, SearchMode, SearchQuery};
use engram_storage::Storage;
use engram_verify::{can_merge, VerificationEngine};
use engram_write::{
    FactEngine, MessageEngine, NewFact, NewMessage, NewObservation, ObservationEngine,
};

struct World {
    storage: Arc<Storage>,
    facts: FactEngine,
    observations: ObservationEngine,
    messages: MessageEngine,
    search: SearchEngine,
    branches: BranchEngine,
    merges: MergeEngine,
    consolidation: ConsolidationEngine,
    verification: VerificationEngine,
    conversations: ConversationEngine,
    semantic_diff: SemanticDiffEngine,
}

fn world() -> World {
    let storage = Arc::new(Storage::open_in_memory().expect("open store"));
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbedding::new(16));
    World {
        facts: FactEngine::new(storage.clone(), embedder.clone()),
        observations: ObservationEngine::new(storage.clone(), embedder.clone()),
        messages: MessageEngine::new(storage.clone(), embedder.clone()),
        search: SearchEngine::new(storage.clone(), embedder.clone()),
        branches: BranchEngine::new(storage.clone()),
        merges: MergeEngine::new(storage.clone(), embedder),
        consolidation: ConsolidationEngine::new(storage.clone()),
        verification: VerificationEngine::new(storage.clone(), None),
        conversations: ConversationEngine::new(storage.clone()),
        semantic_diff: SemanticDiffEngine::new(storage.clone()),
        storage,
    }
}

fn fact(text: &str, category: &str, confidence: f64, branch: &str) -> NewFact {
    NewFact {
        text: text.to_string(),
        category: category.to_string(),
        confidence,
        branch: branch.to_string(),
        source_type: None,
        source_id: None,
        session_id: None,
        task_id: None,
        agent_id: None,
        metadata: None,
    }
}

fn query(text: &str, branch: &str, limit: usize) -> SearchQuery {
    SearchQuery {
        query: text.to_string(),
        branch: branch.to_string(),
        category: None,
        limit,
        mode: SearchMode::Hybrid,
        time_window_secs: None,
    }
}

#[tokio::test]
async fn scenario_branch_fact_search_round_trip() {
    let w = world();
    w.branches
        .create("feature_x", "main", CreateBranchOptions::default())
        .unwrap();
    w.facts
        .create(fact(
            "auth middleware must accept Bearer tokens",
            "security",
            0.8,
            "feature_x",
        ))
        .await
        .unwrap();

    let hits = w
        .search
        .search(&query("middleware must accept Bearer tokens", "feature_x", 5))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].score > 0.5, "score was {}", hits[0].score);

    // branch isolation: main sees nothing
    let on_main = w
        .search
        .search(&query("middleware must accept Bearer tokens", "main", 5))
        .await
        .unwrap();
    assert!(on_main.is_empty());
}

#[tokio::test]
async fn scenario_native_merge_with_skip() {
    let w = world();
    let a = w
        .facts
        .create(fact("API uses snake_case", "pattern", 0.8, "main"))
        .await
        .unwrap();
    w.branches
        .create("feature_y", "main", CreateBranchOptions::default())
        .unwrap();
    w.facts
        .create(fact("API uses snake case everywhere", "pattern", 0.9, "feature_y"))
        .await
        .unwrap();

    let record = w
        .merges
        .merge(
            &MergeRequest {
                source: "feature_y".into(),
                target: "main".into(),
                strategy: MergeStrategy::Native,
                conflict: Some(ConflictPolicy::Skip),
                ids: None,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(record.counts.merged, 0);
    assert_eq!(record.counts.skipped, 1);
    // A unchanged, B not copied
    let on_main = w.storage.list_facts("main", None, None).unwrap();
    assert_eq!(on_main.len(), 1);
    assert_eq!(on_main[0].id, a.id);
    assert_eq!(on_main[0].text, "API uses snake_case");
}

#[tokio::test]
async fn scenario_auto_merge_embedding_conflict() {
    let w = world();
    w.facts
        .create(fact("API uses snake_case", "pattern", 0.8, "main"))
        .await
        .unwrap();
    // curated fork so the source holds only its own fact
    w.branches
        .create(
            "feature_y",
            "main",
            CreateBranchOptions {
                entities: Some(vec![]),
                ..Default::default()
            },
        )
        .unwrap();
    // identical wording: deterministic mock embeddings give cosine 1.0 ≥ 0.85
    w.facts
        .create(fact("API uses snake_case", "pattern", 0.9, "feature_y"))
        .await
        .unwrap();

    let record = w
        .merges
        .merge(
            &MergeRequest {
                source: "feature_y".into(),
                target: "main".into(),
                strategy: MergeStrategy::Auto,
                conflict: None,
                ids: None,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(record.counts.merged, 0);
    assert_eq!(record.counts.skipped, 1);
    assert_eq!(record.counts.conflicted, 1);
}

#[tokio::test]
async fn scenario_consolidation_produces_one_fact() {
    let w = world();
    w.branches
        .create("task/fix-auth", "main", CreateBranchOptions::default())
        .unwrap();
    w.branches
        .create("task/fix-auth/agent_1", "task/fix-auth", CreateBranchOptions::default())
        .unwrap();

    let branch = "task/fix-auth/agent_1";
    for summary in [
        "bearer auth skipped when api key present",
        "bearer auth skipped when api key is present",
    ] {
        w.observations
            .capture(NewObservation {
                session_id: "s-1".into(),
                obs_type: ObservationType::Insight,
                tool_name: None,
                summary: summary.into(),
                raw_input: None,
                raw_output: None,
                outcome: Outcome::Success,
                branch: branch.into(),
                task_id: None,
                agent_id: Some("agent_1".into()),
            })
            .await
            .unwrap();
    }

    let first = w
        .consolidation
        .consolidate_session(branch, "s-1", &CancellationToken::new())
        .unwrap();
    assert_eq!(first.created_count, 1);

    let facts = w.storage.list_facts(branch, None, None).unwrap();
    assert_eq!(facts.len(), 1);
    assert!((facts[0].confidence - 0.7).abs() < f64::EPSILON);

    let second = w
        .consolidation
        .consolidate_session(branch, "s-1", &CancellationToken::new())
        .unwrap();
    assert_eq!(second.created_count, 0);
    let facts = w.storage.list_facts(branch, None, None).unwrap();
    assert!((facts[0].confidence - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn scenario_verification_and_merge_gate() {
    let w = world();
    w.branches
        .create("task/hardening", "main", CreateBranchOptions::default())
        .unwrap();
    // Heuristic scoring: high-confidence bug_fix with a long text verifies,
    // a short low-confidence note does not.
    let good = w
        .facts
        .create(fact(
            "expired bearer tokens now return 401 from the auth middleware instead of \
             silently falling through to the anonymous role, which masked the regression",
            "bug_fix",
            0.9,
            "task/hardening",
        ))
        .await
        .unwrap();
    let shaky = w
        .facts
        .create(fact("maybe flaky?", "general", 0.4, "task/hardening"))
        .await
        .unwrap();

    let outcomes = w
        .verification
        .batch_verify("task/hardening", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    let verdict_of = |id: &str| {
        outcomes
            .iter()
            .find(|o| o.fact_id == id)
            .map(|o| o.verdict)
            .unwrap()
    };
    assert_eq!(verdict_of(&good.id), VerificationStatus::Verified);
    assert_eq!(verdict_of(&shaky.id), VerificationStatus::Unverified);

    let (ok, counts) = can_merge(&w.storage, "task/hardening", true).unwrap();
    assert!(!ok);
    assert_eq!(counts.unverified, 1);

    // Manual verification opens the gate.
    w.verification
        .set_verification("task/hardening", &shaky.id, VerificationStatus::Verified)
        .unwrap();
    let (ok, _) = can_merge(&w.storage, "task/hardening", true).unwrap();
    assert!(ok);
}

#[tokio::test]
async fn scenario_replay_and_semantic_diff() {
    let w = world();
    let conv = w
        .messages
        .open_conversation("main", "s-1", None, Some("base".into()), None, None)
        .unwrap();
    for i in 1..=10u32 {
        w.messages
            .append(NewMessage {
                conversation_id: conv.id.clone(),
                role: if i % 2 == 1 { MessageRole::User } else { MessageRole::Assistant },
                content: format!("turn {i} of the original run"),
                thinking: None,
                tool_calls: None,
                model: None,
                token_count: 4,
                session_id: Some("s-1".into()),
                agent_id: None,
                branch: "main".into(),
            })
            .await
            .unwrap();
    }

    let replay = w
        .conversations
        .create_replay("main", &conv.id, 5, serde_json::json!({ "model": "alt" }))
        .unwrap();
    let context = w.conversations.replay_context("main", &replay.id).unwrap();
    assert_eq!(context.len(), 5);

    // External executor appends messages 6..9 on the replay conversation.
    let mut final_ids = Vec::new();
    for i in 6..=9u32 {
        let msg = w
            .messages
            .append(NewMessage {
                conversation_id: replay.conversation_id.clone(),
                role: if i % 2 == 1 { MessageRole::User } else { MessageRole::Assistant },
                content: format!("turn {i} of the alternative run"),
                thinking: None,
                tool_calls: None,
                model: Some("alt".into()),
                token_count: 4,
                session_id: Some("s-1".into()),
                agent_id: None,
                branch: "main".into(),
            })
            .await
            .unwrap();
        assert_eq!(msg.sequence_num, i);
        final_ids.push(msg.id);
    }
    w.conversations.complete_replay(&replay.id, &final_ids).unwrap();

    let diff = w
        .semantic_diff
        .diff("main", &conv.id, "main", &replay.conversation_id)
        .unwrap();
    assert_eq!(diff.shared_prefix_length, 5);
    assert_eq!(diff.outcome.messages_a, 10);
    assert_eq!(diff.outcome.messages_b, 9);
    // neither run called tools, so the action layer cannot diverge
    assert_ne!(diff.verdict, DiffVerdict::Divergent);
}
