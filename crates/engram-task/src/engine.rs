use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use engram_branch::{BranchEngine, CreateBranchOptions, MergeEngine, MergeRequest};
use engram_consolidate::{ConsolidationEngine, TaskConsolidation};
use engram_core::error::Result;
use engram_core::types::{
    new_id, now_rfc3339, Branch, BranchStatus, ConsolidationRecord, MergeRecord, MergeStrategy,
    Objective, ObjectiveStatus, Task,
};
use engram_core::EngramError;
use engram_storage::Storage;
use engram_verify::can_merge;

/// Result of closing out a task.
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub consolidation: TaskConsolidation,
    pub merge: Option<MergeRecord>,
}

/// Coordinates multi-agent work: a task owns a `task/⟨slug⟩` branch,
/// each joined agent a `task/⟨slug⟩/⟨agent⟩` sub-branch. Completion runs
/// the consolidation levels and, when requested, a gated merge back to the
/// parent branch.
pub struct TaskEngine {
    storage: Arc<Storage>,
    branches: Arc<BranchEngine>,
    consolidation: Arc<ConsolidationEngine>,
    merges: Arc<MergeEngine>,
}

impl TaskEngine {
    pub fn new(
        storage: Arc<Storage>,
        branches: Arc<BranchEngine>,
        consolidation: Arc<ConsolidationEngine>,
        merges: Arc<MergeEngine>,
    ) -> Self {
        Self {
            storage,
            branches,
            consolidation,
            merges,
        }
    }

    /// The branch a task coordinates on, derived from its name.
    pub fn task_branch(task: &Task) -> String {
        format!("task/{}", slugify(&task.name))
    }

    pub fn agent_branch(task: &Task, agent_id: &str) -> String {
        format!("task/{}/{}", slugify(&task.name), slugify(agent_id))
    }

    #[instrument(skip(self, objectives), fields(name, parent_branch))]
    pub fn create_task(
        &self,
        name: &str,
        description: Option<String>,
        task_type: Option<String>,
        objectives: Vec<String>,
        parent_branch: &str,
    ) -> Result<(Task, Branch)> {
        if name.trim().is_empty() {
            return Err(EngramError::invalid("name", "must not be empty"));
        }
        let task = Task {
            id: new_id(),
            name: name.to_string(),
            description,
            task_type,
            objectives: objectives
                .into_iter()
                .map(|description| Objective {
                    description,
                    status: ObjectiveStatus::Todo,
                    agent_id: None,
                })
                .collect(),
            parent_branch: parent_branch.to_string(),
            created_at: now_rfc3339(),
        };

        let branch = self.branches.create(
            &Self::task_branch(&task),
            parent_branch,
            CreateBranchOptions {
                description: Some(format!("task: {name}")),
                metadata: Some(serde_json::json!({ "task_id": task.id })),
                entities: None,
            },
        )?;
        self.storage.insert_task(&task)?;
        info!(task_id = %task.id, branch = %branch.name, "task created");
        Ok((task, branch))
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.storage
            .get_task(id)?
            .ok_or_else(|| EngramError::not_found("task", id))
    }

    /// Join an agent: fork a sub-branch off the task branch and claim the
    /// first unowned objective for the agent.
    #[instrument(skip(self), fields(task_id, agent_id))]
    pub fn assign_agent(&self, task_id: &str, agent_id: &str, role: Option<&str>) -> Result<Branch> {
        let mut task = self.get_task(task_id)?;
        let branch = self.branches.create(
            &Self::agent_branch(&task, agent_id),
            &Self::task_branch(&task),
            CreateBranchOptions {
                description: Some(format!("agent {agent_id} on task {}", task.name)),
                metadata: Some(serde_json::json!({
                    "task_id": task.id,
                    "agent_id": agent_id,
                    "role": role,
                })),
                entities: None,
            },
        )?;

        if let Some(objective) = task
            .objectives
            .iter_mut()
            .find(|o| o.agent_id.is_none() && o.status == ObjectiveStatus::Todo)
        {
            objective.agent_id = Some(agent_id.to_string());
            objective.status = ObjectiveStatus::Active;
            self.storage.update_task_objectives(task_id, &task.objectives)?;
        }
        Ok(branch)
    }

    pub fn update_objective(
        &self,
        task_id: &str,
        index: usize,
        status: ObjectiveStatus,
    ) -> Result<Task> {
        let mut task = self.get_task(task_id)?;
        let objective = task.objectives.get_mut(index).ok_or_else(|| {
            EngramError::invalid("index", format!("task has no objective {index}"))
        })?;
        objective.status = status;
        self.storage.update_task_objectives(task_id, &task.objectives)?;
        Ok(task)
    }

    /// Agent done: agent-level consolidation on the agent's sub-branch and
    /// the agent's objectives marked done.
    #[instrument(skip(self, cancel), fields(task_id, agent_id))]
    pub fn complete_agent(
        &self,
        task_id: &str,
        agent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ConsolidationRecord> {
        let mut task = self.get_task(task_id)?;
        let branch = Self::agent_branch(&task, agent_id);
        let record = self
            .consolidation
            .consolidate_agent(&branch, Some(agent_id), cancel)?;

        let mut changed = false;
        for objective in task.objectives.iter_mut() {
            if objective.agent_id.as_deref() == Some(agent_id)
                && objective.status == ObjectiveStatus::Active
            {
                objective.status = ObjectiveStatus::Done;
                changed = true;
            }
        }
        if changed {
            self.storage.update_task_objectives(task_id, &task.objectives)?;
        }
        Ok(record)
    }

    /// Task done: task-level consolidation, then an optional merge of the
    /// task branch into the parent, respecting the merge gate.
    #[instrument(skip(self, cancel), fields(task_id, merge))]
    pub async fn complete_task(
        &self,
        task_id: &str,
        merge: bool,
        require_verified: bool,
        cancel: &CancellationToken,
    ) -> Result<TaskCompletion> {
        let task = self.get_task(task_id)?;
        let branch = Self::task_branch(&task);

        let facts = self.storage.list_facts(&branch, None, None)?;
        let observations = self.storage.list_observations(&branch, None)?;
        if facts.is_empty() && observations.is_empty() {
            return Err(EngramError::PreconditionFailed(format!(
                "task branch '{branch}' holds no facts or observations to consolidate"
            )));
        }

        let consolidation = self.consolidation.consolidate_task(&branch)?;

        let merge_record = if merge {
            let (ok, counts) = can_merge(&self.storage, &branch, require_verified)?;
            if !ok {
                return Err(EngramError::PreconditionFailed(format!(
                    "merge gate closed for '{branch}': {} verified, {} unverified, {} invalidated",
                    counts.verified, counts.unverified, counts.invalidated
                )));
            }
            let record = self
                .merges
                .merge(
                    &MergeRequest {
                        source: branch.clone(),
                        target: task.parent_branch.clone(),
                        strategy: MergeStrategy::Auto,
                        conflict: None,
                        ids: None,
                    },
                    cancel,
                )
                .await?;
            self.storage.update_branch_status(&branch, BranchStatus::Merged)?;
            Some(record)
        } else {
            None
        };

        info!(task_id, merged = merge_record.is_some(), "task completed");
        Ok(TaskCompletion {
            consolidation,
            merge: merge_record,
        })
    }
}

fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_embed::MockEmbedding;

    fn setup() -> TaskEngine {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let embedder = Arc::new(MockEmbedding::new(8));
        TaskEngine::new(
            storage.clone(),
            Arc::new(BranchEngine::new(storage.clone())),
            Arc::new(ConsolidationEngine::new(storage.clone())),
            Arc::new(MergeEngine::new(storage, embedder)),
        )
    }

    #[test]
    fn slugify_produces_branch_safe_names() {
        assert_eq!(slugify("Fix Auth!"), "fix-auth");
        assert_eq!(slugify("already-fine"), "already-fine");
    }

    #[test]
    fn create_task_makes_a_task_branch() {
        let engine = setup();
        let (task, branch) = engine
            .create_task("Fix Auth", None, None, vec!["repro the bug".into()], "main")
            .unwrap();
        assert_eq!(branch.name, "task/fix-auth");
        assert_eq!(task.objectives.len(), 1);
        assert_eq!(task.objectives[0].status, ObjectiveStatus::Todo);
    }

    #[test]
    fn assign_agent_forks_a_sub_branch_and_claims_an_objective() {
        let engine = setup();
        let (task, _) = engine
            .create_task("Fix Auth", None, None, vec!["repro the bug".into()], "main")
            .unwrap();
        let branch = engine.assign_agent(&task.id, "agent_1", Some("debugger")).unwrap();
        assert_eq!(branch.name, "task/fix-auth/agent-1");

        let task = engine.get_task(&task.id).unwrap();
        assert_eq!(task.objectives[0].agent_id.as_deref(), Some("agent_1"));
        assert_eq!(task.objectives[0].status, ObjectiveStatus::Active);
    }

    #[tokio::test]
    async fn complete_task_without_knowledge_is_a_precondition_failure() {
        let engine = setup();
        let (task, _) = engine
            .create_task("Fix Auth", None, None, vec![], "main")
            .unwrap();
        let err = engine
            .complete_task(&task.id, false, false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PRECONDITION_FAILED");
    }
}
