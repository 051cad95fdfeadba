//! Full multi-agent task lifecycle: create → join → observe → consolidate
//! → verify → gated merge back to the parent branch.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use engram_branch::{BranchEngine, MergeEngine};
use engram_consolidate::ConsolidationEngine;
use engram_core::types::{
    new_id, now_rfc3339, BranchStatus, FactStatus, Observation, ObservationType, ObjectiveStatus,
    Outcome, VerificationStatus,
};
use engram_embed::MockEmbedding;
use engram_storage::Storage;
use engram_task::TaskEngine;
use engram_verify::{can_merge, VerificationEngine};

fn observation(branch: &str, session: &str, summary: &str) -> Observation {
    Observation {
        id: new_id(),
        session_id: session.to_string(),
        obs_type: ObservationType::Discovery,
        tool_name: None,
        summary: summary.to_string(),
        raw_input: None,
        raw_output: None,
        outcome: Outcome::Success,
        branch: branch.to_string(),
        task_id: None,
        agent_id: Some("agent_1".to_string()),
        embedding: None,
        created_at: now_rfc3339(),
    }
}

#[tokio::test]
async fn task_lifecycle_from_creation_to_gated_merge() {
    let storage = Arc::new(Storage::open_in_memory().unwrap());
    let branches = Arc::new(BranchEngine::new(storage.clone()));
    let consolidation = Arc::new(ConsolidationEngine::new(storage.clone()));
    let merges = Arc::new(MergeEngine::new(storage.clone(), Arc::new(MockEmbedding::new(16))));
    let tasks = TaskEngine::new(
        storage.clone(),
        branches.clone(),
        consolidation.clone(),
        merges.clone(),
    );
    let verification = VerificationEngine::new(storage.clone(), None);
    let cancel = CancellationToken::new();

    // Create the task and join one agent.
    let (task, task_branch) = tasks
        .create_task(
            "Fix Auth",
            Some("bearer tokens fall through to anonymous".to_string()),
            Some("bugfix".to_string()),
            vec!["reproduce the fallthrough".to_string(), "land the patch".to_string()],
            "main",
        )
        .unwrap();
    assert_eq!(task_branch.name, "task/fix-auth");

    let agent_branch = tasks.assign_agent(&task.id, "agent_1", Some("debugger")).unwrap();
    assert_eq!(agent_branch.name, "task/fix-auth/agent-1");

    // The agent works: observations land on its sub-branch.
    for summary in [
        "auth middleware drops the bearer header when an api key header is present",
        "the bug_fix is a missing early return in the api key branch of the middleware",
    ] {
        storage
            .insert_observation(&observation(&agent_branch.name, "s-1", summary))
            .unwrap();
    }
    let session_record = consolidation
        .consolidate_session(&agent_branch.name, "s-1", &cancel)
        .unwrap();
    assert_eq!(session_record.created_count, 2);

    // Agent done: agent-level consolidation runs, its objective closes.
    tasks.complete_agent(&task.id, "agent_1", &cancel).unwrap();
    let task_after = tasks.get_task(&task.id).unwrap();
    assert_eq!(task_after.objectives[0].status, ObjectiveStatus::Done);

    // Promote the agent's knowledge to the task branch.
    merges
        .merge(
            &engram_branch::MergeRequest {
                source: agent_branch.name.clone(),
                target: task_branch.name.clone(),
                strategy: engram_core::types::MergeStrategy::Auto,
                conflict: None,
                ids: None,
            },
            &cancel,
        )
        .await
        .unwrap();
    let task_facts = storage.list_facts(&task_branch.name, Some(FactStatus::Active), None).unwrap();
    assert!(!task_facts.is_empty());

    // Unverified facts keep the gate closed.
    verification.batch_verify(&task_branch.name, &cancel).await.unwrap();
    let (ok, counts) = can_merge(&storage, &task_branch.name, true).unwrap();
    if !ok {
        assert!(counts.unverified > 0);
        for fact in storage
            .list_facts(&task_branch.name, Some(FactStatus::Active), None)
            .unwrap()
        {
            verification
                .set_verification(&task_branch.name, &fact.id, VerificationStatus::Verified)
                .unwrap();
        }
    }
    let (ok, _) = can_merge(&storage, &task_branch.name, true).unwrap();
    assert!(ok);

    // Complete the task with a gated merge into main.
    let completion = tasks.complete_task(&task.id, true, true, &cancel).await.unwrap();
    assert!(completion.merge.is_some());
    assert_eq!(
        branches.get(&task_branch.name).unwrap().status,
        BranchStatus::Merged
    );
    let on_main = storage.list_facts("main", Some(FactStatus::Active), None).unwrap();
    assert!(!on_main.is_empty());
}
