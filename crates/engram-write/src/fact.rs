use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument};

use engram_core::error::Result;
use engram_core::types::{new_id, now_rfc3339, Fact, FactStatus};
use engram_core::EngramError;
use engram_embed::EmbeddingProvider;
use engram_storage::Storage;

use crate::pipeline::embed_best_effort;

/// Input for a new fact write. Branch defaults are resolved by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct NewFact {
    pub text: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub branch: String,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub session_id: Option<String>,
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

fn default_category() -> String {
    "general".to_string()
}
fn default_confidence() -> f64 {
    0.5
}

/// Write engine for facts: create, supersede, archive.
pub struct FactEngine {
    storage: Arc<Storage>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl FactEngine {
    pub fn new(storage: Arc<Storage>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { storage, embedder }
    }

    fn validate(input: &NewFact) -> Result<()> {
        if input.text.trim().is_empty() {
            return Err(EngramError::invalid("text", "must not be empty"));
        }
        if !(0.0..=1.0).contains(&input.confidence) {
            return Err(EngramError::invalid(
                "confidence",
                format!("{} is outside [0, 1]", input.confidence),
            ));
        }
        Ok(())
    }

    /// Validate → embed best-effort → persist. Never deduplicates; that is
    /// the consolidation engine's job.
    #[instrument(skip(self, input), fields(branch = %input.branch))]
    pub async fn create(&self, input: NewFact) -> Result<Fact> {
        Self::validate(&input)?;
        let embedding = embed_best_effort(self.embedder.as_ref(), &input.text).await;
        let now = now_rfc3339();
        let fact = Fact {
            id: new_id(),
            text: input.text,
            category: input.category,
            confidence: input.confidence,
            status: FactStatus::Active,
            parent_id: None,
            source_type: input.source_type,
            source_id: input.source_id,
            session_id: input.session_id,
            task_id: input.task_id,
            agent_id: input.agent_id,
            branch: input.branch,
            embedding,
            // Metadata must stay an object so later stamps (verification,
            // cherry-pick back-refs) can index into it.
            metadata: input
                .metadata
                .filter(|m| m.is_object())
                .unwrap_or_else(|| serde_json::json!({})),
            created_at: now.clone(),
            updated_at: now,
            superseded_at: None,
        };
        self.storage.insert_fact(&fact)?;
        debug!(id = %fact.id, "fact written");
        Ok(fact)
    }

    pub fn get(&self, branch: &str, id: &str) -> Result<Fact> {
        self.storage
            .get_fact(branch, id)?
            .ok_or_else(|| EngramError::not_found("fact", id))
    }

    pub fn list(
        &self,
        branch: &str,
        status: Option<FactStatus>,
        category: Option<&str>,
    ) -> Result<Vec<Fact>> {
        self.storage.list_facts(branch, status, category)
    }

    /// Replace an active fact with a newer version. The old row keeps its
    /// id and is flipped to `superseded`; the new row points back through
    /// `parent_id`. Exactly one of the two is active afterwards.
    #[instrument(skip(self, new_text), fields(branch, id))]
    pub async fn supersede(
        &self,
        branch: &str,
        id: &str,
        new_text: String,
        confidence: Option<f64>,
    ) -> Result<Fact> {
        if new_text.trim().is_empty() {
            return Err(EngramError::invalid("text", "must not be empty"));
        }
        let old = self
            .storage
            .get_fact(branch, id)?
            .ok_or_else(|| EngramError::not_found("fact", id))?;
        if old.status != FactStatus::Active {
            return Err(EngramError::PreconditionFailed(format!(
                "fact {id} is {} and cannot be superseded",
                old.status
            )));
        }

        let embedding = embed_best_effort(self.embedder.as_ref(), &new_text).await;
        let now = now_rfc3339();
        let replacement = Fact {
            id: new_id(),
            text: new_text,
            category: old.category.clone(),
            confidence: confidence.unwrap_or(old.confidence).clamp(0.0, 1.0),
            status: FactStatus::Active,
            parent_id: Some(old.id.clone()),
            source_type: old.source_type.clone(),
            source_id: old.source_id.clone(),
            session_id: old.session_id.clone(),
            task_id: old.task_id.clone(),
            agent_id: old.agent_id.clone(),
            branch: branch.to_string(),
            embedding,
            metadata: old.metadata.clone(),
            created_at: now.clone(),
            updated_at: now,
            superseded_at: None,
        };
        self.storage.supersede_fact(&old.id, &replacement)?;
        debug!(old = %old.id, new = %replacement.id, "fact superseded");
        Ok(replacement)
    }

    pub fn archive(&self, branch: &str, id: &str) -> Result<()> {
        if self.storage.get_fact(branch, id)?.is_none() {
            return Err(EngramError::not_found("fact", id));
        }
        self.storage
            .update_fact_status(branch, id, FactStatus::Archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_embed::MockEmbedding;

    fn engine() -> FactEngine {
        FactEngine::new(
            Arc::new(Storage::open_in_memory().unwrap()),
            Arc::new(MockEmbedding::new(8)),
        )
    }

    fn input(text: &str) -> NewFact {
        NewFact {
            text: text.to_string(),
            category: "general".to_string(),
            confidence: 0.8,
            branch: "main".to_string(),
            source_type: None,
            source_id: None,
            session_id: None,
            task_id: None,
            agent_id: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn create_embeds_and_persists() {
        let engine = engine();
        let fact = engine.create(input("API uses snake_case")).await.unwrap();
        assert!(fact.embedding.is_some());
        let loaded = engine.get("main", &fact.id).unwrap();
        assert_eq!(loaded.text, "API uses snake_case");
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let engine = engine();
        let err = engine.create(input("   ")).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_rejected() {
        let engine = engine();
        let mut bad = input("ok");
        bad.confidence = 1.3;
        assert_eq!(engine.create(bad).await.unwrap_err().code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn supersede_leaves_one_active_head() {
        let engine = engine();
        let old = engine.create(input("retries use fixed backoff")).await.unwrap();
        let new = engine
            .supersede("main", &old.id, "retries use exponential backoff".into(), Some(0.9))
            .await
            .unwrap();
        assert_eq!(new.parent_id.as_deref(), Some(old.id.as_str()));

        let old_row = engine.get("main", &old.id).unwrap();
        assert_eq!(old_row.status, FactStatus::Superseded);
        let new_row = engine.get("main", &new.id).unwrap();
        assert_eq!(new_row.status, FactStatus::Active);

        // superseding a superseded fact is refused
        let err = engine
            .supersede("main", &old.id, "third version".into(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PRECONDITION_FAILED");
    }
}
