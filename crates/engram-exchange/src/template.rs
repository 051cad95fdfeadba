use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use engram_branch::{BranchEngine, CreateBranchOptions};
use engram_core::error::Result;
use engram_core::types::{
    new_id, now_rfc3339, Branch, Fact, FactStatus, Relation, Template, TemplateStatus,
};
use engram_core::EngramError;
use engram_storage::Storage;

/// What a template captures from its source branch.
#[derive(Debug, Serialize, Deserialize)]
pub struct TemplatePayload {
    pub facts: Vec<Fact>,
    pub relations: Vec<Relation>,
}

pub struct TemplateEngine {
    storage: Arc<Storage>,
    branches: Arc<BranchEngine>,
}

impl TemplateEngine {
    pub fn new(storage: Arc<Storage>, branches: Arc<BranchEngine>) -> Self {
        Self { storage, branches }
    }

    /// Snapshot a branch as a reusable template. Re-creating an existing
    /// name bumps its version instead of failing.
    #[instrument(skip(self, task_types, tags), fields(name, source_branch))]
    pub fn create(
        &self,
        name: &str,
        source_branch: &str,
        task_types: Vec<String>,
        tags: Vec<String>,
    ) -> Result<Template> {
        if name.trim().is_empty() {
            return Err(EngramError::invalid("name", "must not be empty"));
        }
        self.storage
            .get_branch(source_branch)?
            .ok_or_else(|| EngramError::not_found("branch", source_branch))?;

        let payload = TemplatePayload {
            facts: self
                .storage
                .list_facts(source_branch, Some(FactStatus::Active), None)?,
            relations: self.storage.list_relations(source_branch, None)?,
        };
        let now = now_rfc3339();
        let template = Template {
            name: name.to_string(),
            source_branch: source_branch.to_string(),
            payload: serde_json::to_string(&payload)?,
            version: 1,
            task_types,
            tags,
            status: TemplateStatus::Active,
            created_at: now.clone(),
            updated_at: now,
        };
        self.storage.upsert_template(&template)?;
        // Read back: an upsert of an existing name bumped the version.
        let stored = self.get(name)?;
        info!(name, version = stored.version, "template saved");
        Ok(stored)
    }

    pub fn get(&self, name: &str) -> Result<Template> {
        self.storage
            .get_template(name)?
            .ok_or_else(|| EngramError::not_found("template", name))
    }

    pub fn list(&self) -> Result<Vec<Template>> {
        self.storage.list_templates()
    }

    pub fn deprecate(&self, name: &str) -> Result<()> {
        self.storage.set_template_status(name, TemplateStatus::Deprecated)
    }

    /// Instantiate a template: create a curated branch and seed it with
    /// the template's facts and relations under fresh ids.
    #[instrument(skip(self), fields(name, branch_name))]
    pub fn apply(&self, name: &str, branch_name: &str, parent: &str) -> Result<Branch> {
        let template = self.get(name)?;
        if template.status == TemplateStatus::Deprecated {
            return Err(EngramError::PreconditionFailed(format!(
                "template '{name}' is deprecated"
            )));
        }
        let payload: TemplatePayload = serde_json::from_str(&template.payload)?;

        let branch = self.branches.create(
            branch_name,
            parent,
            CreateBranchOptions {
                description: Some(format!("from template {name} v{}", template.version)),
                metadata: Some(serde_json::json!({
                    "template": name,
                    "template_version": template.version,
                })),
                entities: Some(vec![]),
            },
        )?;

        for fact in payload.facts {
            let mut metadata = fact.metadata.clone();
            metadata["from_template"] = serde_json::Value::from(name);
            self.storage.insert_fact(&Fact {
                id: new_id(),
                branch: branch_name.to_string(),
                metadata,
                ..fact
            })?;
        }
        for relation in payload.relations {
            self.storage.insert_relation(&Relation {
                id: new_id(),
                branch: branch_name.to_string(),
                ..relation
            })?;
        }
        info!(branch = branch_name, "template applied");
        Ok(branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engines() -> (TemplateEngine, Arc<Storage>) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let branches = Arc::new(BranchEngine::new(storage.clone()));
        (TemplateEngine::new(storage.clone(), branches), storage)
    }

    fn fact(id: &str, text: &str) -> Fact {
        let now = now_rfc3339();
        Fact {
            id: id.to_string(),
            text: text.to_string(),
            category: "pattern".to_string(),
            confidence: 0.9,
            status: FactStatus::Active,
            parent_id: None,
            source_type: None,
            source_id: None,
            session_id: None,
            task_id: None,
            agent_id: None,
            branch: "main".to_string(),
            embedding: None,
            metadata: serde_json::json!({}),
            created_at: now.clone(),
            updated_at: now,
            superseded_at: None,
        }
    }

    #[test]
    fn recreating_a_template_bumps_its_version() {
        let (engine, storage) = engines();
        storage.insert_fact(&fact("f-1", "seed knowledge")).unwrap();
        let v1 = engine.create("rust-service", "main", vec![], vec![]).unwrap();
        assert_eq!(v1.version, 1);
        let v2 = engine.create("rust-service", "main", vec![], vec![]).unwrap();
        assert_eq!(v2.version, 2);
    }

    #[test]
    fn apply_seeds_a_fresh_branch() {
        let (engine, storage) = engines();
        storage.insert_fact(&fact("f-1", "seed knowledge")).unwrap();
        engine.create("rust-service", "main", vec![], vec![]).unwrap();

        let branch = engine.apply("rust-service", "template/rust-svc-2", "main").unwrap();
        assert_eq!(branch.name, "template/rust-svc-2");
        let seeded = storage.list_facts("template/rust-svc-2", None, None).unwrap();
        assert_eq!(seeded.len(), 1);
        assert_ne!(seeded[0].id, "f-1");
        assert_eq!(seeded[0].metadata["from_template"].as_str(), Some("rust-service"));
    }

    #[test]
    fn deprecated_templates_cannot_be_applied() {
        let (engine, storage) = engines();
        storage.insert_fact(&fact("f-1", "seed knowledge")).unwrap();
        engine.create("old", "main", vec![], vec![]).unwrap();
        engine.deprecate("old").unwrap();
        let err = engine.apply("old", "template/new-try", "main").unwrap_err();
        assert_eq!(err.code(), "PRECONDITION_FAILED");
    }
}
