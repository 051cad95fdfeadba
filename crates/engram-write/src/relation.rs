use std::sync::Arc;

use serde::Deserialize;
use tracing::instrument;

use engram_core::error::Result;
use engram_core::types::{new_id, now_rfc3339, Relation};
use engram_core::EngramError;
use engram_storage::Storage;

#[derive(Debug, Clone, Deserialize)]
pub struct NewRelation {
    pub source_entity: String,
    pub target_entity: String,
    pub relation_type: String,
    #[serde(default)]
    pub properties: Option<serde_json::Value>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub branch: String,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
}

fn default_confidence() -> f64 {
    0.5
}

/// Write engine for relations. Relations carry no free text worth
/// embedding, so this is the one path with no embedding step.
pub struct RelationEngine {
    storage: Arc<Storage>,
}

impl RelationEngine {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    #[instrument(skip(self, input), fields(branch = %input.branch))]
    pub fn create(&self, input: NewRelation) -> Result<Relation> {
        if input.source_entity.is_empty() || input.target_entity.is_empty() {
            return Err(EngramError::invalid(
                "relation",
                "source and target entities must not be empty",
            ));
        }
        if !(0.0..=1.0).contains(&input.confidence) {
            return Err(EngramError::invalid(
                "confidence",
                format!("{} is outside [0, 1]", input.confidence),
            ));
        }
        let rel = Relation {
            id: new_id(),
            source_entity: input.source_entity,
            target_entity: input.target_entity,
            relation_type: input.relation_type,
            properties: input.properties.unwrap_or_else(|| serde_json::json!({})),
            confidence: input.confidence,
            branch: input.branch,
            valid_from: input.valid_from,
            valid_to: input.valid_to,
            created_at: now_rfc3339(),
        };
        self.storage.insert_relation(&rel)?;
        Ok(rel)
    }

    pub fn list(&self, branch: &str, entity: Option<&str>) -> Result<Vec<Relation>> {
        self.storage.list_relations(branch, entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_list_by_entity() {
        let engine = RelationEngine::new(Arc::new(Storage::open_in_memory().unwrap()));
        engine
            .create(NewRelation {
                source_entity: "svc-auth".into(),
                target_entity: "svc-gateway".into(),
                relation_type: "depends_on".into(),
                properties: None,
                confidence: 0.9,
                branch: "main".into(),
                valid_from: None,
                valid_to: None,
            })
            .unwrap();
        assert_eq!(engine.list("main", Some("svc-auth")).unwrap().len(), 1);
        assert!(engine.list("main", Some("svc-other")).unwrap().is_empty());
    }
}
