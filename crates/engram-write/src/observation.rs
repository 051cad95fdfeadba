use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument};

use engram_core::error::Result;
use engram_core::types::{new_id, now_rfc3339, Observation, ObservationType, Outcome};
use engram_core::EngramError;
use engram_embed::EmbeddingProvider;
use engram_storage::Storage;

use crate::pipeline::{embed_best_effort, truncate_payload};

#[derive(Debug, Clone, Deserialize)]
pub struct NewObservation {
    pub session_id: String,
    pub obs_type: ObservationType,
    pub tool_name: Option<String>,
    pub summary: String,
    pub raw_input: Option<String>,
    pub raw_output: Option<String>,
    #[serde(default = "default_outcome")]
    pub outcome: Outcome,
    pub branch: String,
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
}

fn default_outcome() -> Outcome {
    Outcome::Success
}

/// Append-only write engine for observations.
pub struct ObservationEngine {
    storage: Arc<Storage>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl ObservationEngine {
    pub fn new(storage: Arc<Storage>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { storage, embedder }
    }

    #[instrument(skip(self, input), fields(branch = %input.branch, session = %input.session_id))]
    pub async fn capture(&self, input: NewObservation) -> Result<Observation> {
        if input.summary.trim().is_empty() {
            return Err(EngramError::invalid("summary", "must not be empty"));
        }
        let embedding = embed_best_effort(self.embedder.as_ref(), &input.summary).await;
        let obs = Observation {
            id: new_id(),
            session_id: input.session_id,
            obs_type: input.obs_type,
            tool_name: input.tool_name,
            summary: input.summary,
            raw_input: truncate_payload(input.raw_input),
            raw_output: truncate_payload(input.raw_output),
            outcome: input.outcome,
            branch: input.branch,
            task_id: input.task_id,
            agent_id: input.agent_id,
            embedding,
            created_at: now_rfc3339(),
        };
        self.storage.insert_observation(&obs)?;
        debug!(id = %obs.id, obs_type = %obs.obs_type, "observation captured");
        Ok(obs)
    }

    pub fn list(&self, branch: &str, session_id: Option<&str>) -> Result<Vec<Observation>> {
        self.storage.list_observations(branch, session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_embed::MockEmbedding;

    fn engine() -> ObservationEngine {
        ObservationEngine::new(
            Arc::new(Storage::open_in_memory().unwrap()),
            Arc::new(MockEmbedding::new(8)),
        )
    }

    #[tokio::test]
    async fn capture_truncates_raw_payloads() {
        let engine = engine();
        let obs = engine
            .capture(NewObservation {
                session_id: "s-1".into(),
                obs_type: ObservationType::ToolUse,
                tool_name: Some("bash".into()),
                summary: "ran migration script".into(),
                raw_input: Some("x".repeat(4000)),
                raw_output: Some("ok".into()),
                outcome: Outcome::Success,
                branch: "main".into(),
                task_id: None,
                agent_id: None,
            })
            .await
            .unwrap();
        assert_eq!(obs.raw_input.as_ref().unwrap().len(), 2000);
        assert_eq!(obs.raw_output.as_deref(), Some("ok"));

        let listed = engine.list("main", Some("s-1")).unwrap();
        assert_eq!(listed.len(), 1);
    }
}
