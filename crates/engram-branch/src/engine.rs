use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use engram_core::error::Result;
use engram_core::types::{now_rfc3339, Branch, BranchStatus, EntityKind};
use engram_core::EngramError;
use engram_storage::{branch_slug, table_for, DiffCounts, RowDiff, Storage};

use crate::names::validate_branch_name;

/// Options for branch creation.
///
/// `entities: None` forks every entity table with the parent's data.
/// `entities: Some(list)` forks the listed entities with data and creates
/// the rest empty; `Some([])` is the curated-branch form where every table
/// starts empty and receives cherry-picked rows later.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBranchOptions {
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub entities: Option<Vec<EntityKind>>,
}

/// Row-level changes per entity between two branches.
#[derive(Debug, Clone, Serialize)]
pub struct BranchDiff {
    pub source: String,
    pub target: String,
    pub entities: HashMap<EntityKind, Vec<RowDiff>>,
}

pub struct BranchEngine {
    storage: Arc<Storage>,
}

impl BranchEngine {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Create a branch: fork one table per entity over the autocommit
    /// channel, then publish the registry entry last. If any fork fails the
    /// already-created tables are removed and no registry row is written.
    #[instrument(skip(self, opts))]
    pub fn create(&self, name: &str, parent: &str, opts: CreateBranchOptions) -> Result<Branch> {
        validate_branch_name(name)?;
        if self.storage.get_branch(name)?.is_some() {
            return Err(EngramError::Conflict(format!("branch '{name}' already exists")));
        }
        let parent_branch = self
            .storage
            .get_branch(parent)?
            .ok_or_else(|| EngramError::not_found("parent branch", parent))?;
        if parent_branch.status == BranchStatus::Archived {
            return Err(EngramError::PreconditionFailed(format!(
                "parent branch '{parent}' is archived"
            )));
        }
        // Distinct names must map to distinct physical tables.
        let slug = branch_slug(name);
        for existing in self.storage.list_branches(None)? {
            if existing.name != name && branch_slug(&existing.name) == slug {
                return Err(EngramError::Conflict(format!(
                    "branch '{name}' collides with '{}' after slugging",
                    existing.name
                )));
            }
        }

        for entity in EntityKind::ALL {
            let with_data = opts
                .entities
                .as_ref()
                .map(|list| list.contains(&entity))
                .unwrap_or(true);
            let src = table_for(entity, parent);
            let dst = table_for(entity, name);
            if let Err(e) = self.storage.fork_table(entity, &src, &dst, name, with_data) {
                error!(branch = name, entity = %entity, error = %e, "fork failed, rolling back");
                // Best-effort cleanup of the tables created so far.
                let _ = self.storage.drop_branch_tables(name);
                return Err(e);
            }
        }

        let branch = Branch {
            name: name.to_string(),
            parent: Some(parent.to_string()),
            status: BranchStatus::Active,
            description: opts.description,
            metadata: opts.metadata.unwrap_or_else(|| serde_json::json!({})),
            created_at: now_rfc3339(),
        };
        self.storage.insert_branch(&branch)?;
        info!(branch = name, parent, "branch created");
        Ok(branch)
    }

    pub fn get(&self, name: &str) -> Result<Branch> {
        self.storage
            .get_branch(name)?
            .ok_or_else(|| EngramError::not_found("branch", name))
    }

    pub fn list(&self, statuses: Option<&[BranchStatus]>) -> Result<Vec<Branch>> {
        self.storage.list_branches(statuses)
    }

    /// Archive a branch: drop its tables and mark the registry row.
    /// Idempotent — archiving an archived branch is a no-op. Merge history
    /// referencing the branch is left untouched.
    #[instrument(skip(self))]
    pub fn archive(&self, name: &str) -> Result<()> {
        if name == engram_core::config::ROOT_BRANCH {
            return Err(EngramError::invalid("branch", "the root branch cannot be archived"));
        }
        let branch = self
            .storage
            .get_branch(name)?
            .ok_or_else(|| EngramError::not_found("branch", name))?;
        if branch.status == BranchStatus::Archived {
            return Ok(());
        }
        self.storage.drop_branch_tables(name)?;
        self.storage.update_branch_status(name, BranchStatus::Archived)?;
        info!(branch = name, "branch archived");
        Ok(())
    }

    /// Row-level diff of every branch-participating entity.
    pub fn diff(&self, source: &str, target: &str) -> Result<BranchDiff> {
        self.require_active_tables(source, "source branch")?;
        self.require_active_tables(target, "target branch")?;
        let mut entities = HashMap::new();
        for entity in EntityKind::ALL {
            let changes = self
                .storage
                .diff_rows(&table_for(entity, source), &table_for(entity, target))?;
            entities.insert(entity, changes);
        }
        Ok(BranchDiff {
            source: source.to_string(),
            target: target.to_string(),
            entities,
        })
    }

    /// Count-only diff across all entities.
    pub fn diff_count(&self, source: &str, target: &str) -> Result<HashMap<EntityKind, DiffCounts>> {
        self.require_active_tables(source, "source branch")?;
        self.require_active_tables(target, "target branch")?;
        let mut out = HashMap::new();
        for entity in EntityKind::ALL {
            out.insert(
                entity,
                self.storage
                    .diff_count(&table_for(entity, source), &table_for(entity, target))?,
            );
        }
        Ok(out)
    }

    pub(crate) fn require_active_tables(&self, name: &str, kind: &'static str) -> Result<Branch> {
        let branch = self
            .storage
            .get_branch(name)?
            .ok_or_else(|| EngramError::NotFound { kind, id: name.to_string() })?;
        if branch.status == BranchStatus::Archived {
            return Err(EngramError::PreconditionFailed(format!(
                "branch '{name}' is archived"
            )));
        }
        Ok(branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (BranchEngine, Arc<Storage>) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        (BranchEngine::new(storage.clone()), storage)
    }

    #[test]
    fn create_publishes_registry_entry_and_tables() {
        let (engine, storage) = engine();
        engine
            .create("feature_x", "main", CreateBranchOptions::default())
            .unwrap();
        assert!(storage.table_exists("facts_feature_x").unwrap());
        let listed = engine.list(None).unwrap();
        assert!(listed.iter().any(|b| b.name == "feature_x"));
    }

    #[test]
    fn create_rejects_unknown_parent_and_duplicates() {
        let (engine, _) = engine();
        let err = engine
            .create("feature_x", "nope", CreateBranchOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        engine
            .create("feature_x", "main", CreateBranchOptions::default())
            .unwrap();
        let err = engine
            .create("feature_x", "main", CreateBranchOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[test]
    fn slug_collisions_are_refused() {
        let (engine, _) = engine();
        engine
            .create("task/fix-auth", "main", CreateBranchOptions::default())
            .unwrap();
        let err = engine
            .create("task/fix_auth", "main", CreateBranchOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[test]
    fn curated_branch_starts_empty() {
        let (engine, storage) = engine();
        storage
            .insert_row(
                "facts",
                &serde_json::json!({
                    "id": "f-1", "text": "seed", "category": "general",
                    "confidence": 0.5, "status": "active", "branch": "main",
                    "metadata": "{}", "created_at": now_rfc3339(),
                    "updated_at": now_rfc3339()
                }),
            )
            .unwrap();
        engine
            .create(
                "curated",
                "main",
                CreateBranchOptions {
                    entities: Some(vec![]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(storage.dump_rows("facts_curated").unwrap().is_empty());
    }

    #[test]
    fn archive_is_idempotent_and_keeps_registry_row() {
        let (engine, storage) = engine();
        engine
            .create("feature_x", "main", CreateBranchOptions::default())
            .unwrap();
        engine.archive("feature_x").unwrap();
        engine.archive("feature_x").unwrap();
        assert!(!storage.table_exists("facts_feature_x").unwrap());
        assert_eq!(engine.get("feature_x").unwrap().status, BranchStatus::Archived);
    }

    #[test]
    fn root_branch_cannot_be_archived() {
        let (engine, _) = engine();
        assert_eq!(engine.archive("main").unwrap_err().code(), "INVALID_ARGUMENT");
    }
}
