use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use engram_core::error::Result;
use engram_core::types::{
    new_id, now_rfc3339, ConflictPolicy, EntityKind, Fact, FactStatus, MergeCounts, MergeRecord,
    MergeStrategy,
};
use engram_core::EngramError;
use engram_embed::EmbeddingProvider;
use engram_storage::vector::cosine;
use engram_storage::{table_for, Storage};

/// Two facts whose embeddings agree at least this much are the same
/// knowledge for auto-merge purposes.
pub const AUTO_CONFLICT_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequest {
    pub source: String,
    pub target: String,
    pub strategy: MergeStrategy,
    /// Required by the native strategy.
    pub conflict: Option<ConflictPolicy>,
    /// Required by cherry_pick: explicit row ids to copy.
    pub ids: Option<Vec<String>>,
}

/// Executes the four merge strategies. Merging never mutates the source
/// branch; every call appends a merge-history row, success counts and all.
pub struct MergeEngine {
    storage: Arc<Storage>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl MergeEngine {
    pub fn new(storage: Arc<Storage>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { storage, embedder }
    }

    #[instrument(skip(self, req, cancel), fields(source = %req.source, target = %req.target, strategy = %req.strategy))]
    pub async fn merge(&self, req: &MergeRequest, cancel: &CancellationToken) -> Result<MergeRecord> {
        self.storage
            .get_branch(&req.source)?
            .ok_or_else(|| EngramError::NotFound {
                kind: "source branch",
                id: req.source.clone(),
            })?;
        self.storage
            .get_branch(&req.target)?
            .ok_or_else(|| EngramError::NotFound {
                kind: "target branch",
                id: req.target.clone(),
            })?;

        let counts = match req.strategy {
            MergeStrategy::Native => self.merge_native(req, cancel)?,
            MergeStrategy::Auto => self.merge_auto(req, cancel)?,
            MergeStrategy::CherryPick => self.merge_cherry_pick(req, cancel)?,
            MergeStrategy::Squash => self.merge_squash(req).await?,
        };

        let record = MergeRecord {
            id: new_id(),
            source: req.source.clone(),
            target: req.target.clone(),
            strategy: req.strategy,
            counts,
            created_at: now_rfc3339(),
        };
        self.storage.insert_merge_record(&record)?;
        info!(
            merged = counts.merged,
            skipped = counts.skipped,
            conflicted = counts.conflicted,
            "merge complete"
        );
        Ok(record)
    }

    pub fn history(&self, target: Option<&str>) -> Result<Vec<MergeRecord>> {
        self.storage.list_merge_records(target)
    }

    /// Delegate to the storage MERGE per entity. One transaction per
    /// entity; a conflict policy is mandatory.
    fn merge_native(&self, req: &MergeRequest, cancel: &CancellationToken) -> Result<MergeCounts> {
        let policy = req.conflict.ok_or_else(|| {
            EngramError::Conflict("native merge requires a conflict policy (skip or accept)".into())
        })?;
        let mut counts = MergeCounts::default();
        for entity in EntityKind::ALL {
            if cancel.is_cancelled() {
                return Err(EngramError::Cancelled);
            }
            let src = table_for(entity, &req.source);
            let dst = table_for(entity, &req.target);
            let c = self.storage.merge_rows(&src, &dst, &req.target, policy)?;
            counts.merged += c.merged;
            counts.skipped += c.skipped;
            counts.conflicted += c.conflicted;
            if c.merged > 0 {
                self.storage.rebuild_fts(entity, &req.target)?;
            }
        }
        Ok(counts)
    }

    /// Embedding-aware merge: a source fact whose nearest target fact is
    /// too similar is treated as a conflict and skipped; everything else is
    /// copied. Non-fact entities are copied by primary key.
    fn merge_auto(&self, req: &MergeRequest, cancel: &CancellationToken) -> Result<MergeCounts> {
        let mut counts = MergeCounts::default();

        let source_facts = self.storage.list_facts(&req.source, None, None)?;
        let target_facts = self.storage.list_facts(&req.target, None, None)?;
        let target_ids: std::collections::HashSet<&str> =
            target_facts.iter().map(|f| f.id.as_str()).collect();

        for fact in source_facts {
            if cancel.is_cancelled() {
                return Err(EngramError::Cancelled);
            }
            if target_ids.contains(fact.id.as_str()) {
                counts.skipped += 1;
                continue;
            }
            let nearest = fact
                .embedding
                .as_ref()
                .map(|emb| {
                    target_facts
                        .iter()
                        .filter_map(|t| t.embedding.as_ref().map(|te| cosine(emb, te)))
                        .fold(0.0f64, f64::max)
                })
                .unwrap_or(0.0);
            if nearest >= AUTO_CONFLICT_THRESHOLD {
                counts.skipped += 1;
                counts.conflicted += 1;
                continue;
            }
            let copy = Fact {
                branch: req.target.clone(),
                ..fact
            };
            self.storage.insert_fact(&copy)?;
            counts.merged += 1;
        }

        // Remaining entities: straight primary-key copy of missing rows.
        for entity in [
            EntityKind::Relation,
            EntityKind::Observation,
            EntityKind::Conversation,
            EntityKind::Message,
        ] {
            if cancel.is_cancelled() {
                return Err(EngramError::Cancelled);
            }
            counts.merged += self.copy_missing_rows(entity, &req.source, &req.target)?;
        }
        self.storage.rebuild_fts(EntityKind::Observation, &req.target)?;
        Ok(counts)
    }

    fn copy_missing_rows(&self, entity: EntityKind, source: &str, target: &str) -> Result<u64> {
        let src_rows = self.storage.dump_rows(&table_for(entity, source))?;
        let dst_rows = self.storage.dump_rows(&table_for(entity, target))?;
        let dst_ids: std::collections::HashSet<String> = dst_rows
            .iter()
            .filter_map(|r| r["id"].as_str().map(String::from))
            .collect();
        let dst_table = table_for(entity, target);
        let mut copied = 0;
        for mut row in src_rows {
            let Some(id) = row["id"].as_str().map(String::from) else { continue };
            if dst_ids.contains(&id) {
                continue;
            }
            row["branch"] = serde_json::Value::from(target);
            self.storage.insert_row(&dst_table, &row)?;
            copied += 1;
        }
        Ok(copied)
    }

    /// Copy an explicit id list into the target with fresh ids, remapping
    /// message → conversation foreign keys and recording a back-reference
    /// in each copy's metadata. The source rows are untouched.
    fn merge_cherry_pick(&self, req: &MergeRequest, cancel: &CancellationToken) -> Result<MergeCounts> {
        let ids = req.ids.as_ref().filter(|v| !v.is_empty()).ok_or_else(|| {
            EngramError::invalid("ids", "cherry_pick requires a non-empty id list")
        })?;
        let mut counts = MergeCounts::default();
        let mut conversation_map: std::collections::HashMap<String, String> =
            std::collections::HashMap::new();

        // Conversations first so their messages can be remapped.
        for id in ids {
            if let Some(conv) = self.storage.get_conversation(&req.source, id)? {
                let new = new_id();
                let mut metadata = conv.metadata.clone();
                metadata["cherry_picked_from"] = serde_json::Value::from(conv.id.clone());
                let copy = engram_core::types::Conversation {
                    id: new.clone(),
                    branch: req.target.clone(),
                    metadata,
                    ..conv
                };
                self.storage.insert_conversation(&copy)?;
                conversation_map.insert(id.clone(), new);
                counts.merged += 1;
            }
        }

        for id in ids {
            if cancel.is_cancelled() {
                return Err(EngramError::Cancelled);
            }
            if conversation_map.contains_key(id) {
                continue;
            }
            if let Some(fact) = self.storage.get_fact(&req.source, id)? {
                let mut metadata = fact.metadata.clone();
                metadata["cherry_picked_from"] = serde_json::Value::from(fact.id.clone());
                let copy = Fact {
                    id: new_id(),
                    branch: req.target.clone(),
                    metadata,
                    ..fact
                };
                self.storage.insert_fact(&copy)?;
                counts.merged += 1;
            } else if let Some(msg) = self.storage.get_message(&req.source, id)? {
                let mut metadata = msg.metadata.clone();
                metadata["cherry_picked_from"] = serde_json::Value::from(msg.id.clone());
                let conversation_id = conversation_map
                    .get(&msg.conversation_id)
                    .cloned()
                    .unwrap_or_else(|| msg.conversation_id.clone());
                let copy = engram_core::types::Message {
                    id: new_id(),
                    conversation_id,
                    branch: req.target.clone(),
                    metadata,
                    ..msg
                };
                self.storage.insert_message(&copy)?;
                counts.merged += 1;
            } else if let Some(obs) = self.storage.get_observation(&req.source, id)? {
                let copy = engram_core::types::Observation {
                    id: new_id(),
                    branch: req.target.clone(),
                    ..obs
                };
                self.storage.insert_observation(&copy)?;
                counts.merged += 1;
            } else if let Some(rel) = self.storage.get_relation(&req.source, id)? {
                let mut properties = rel.properties.clone();
                properties["cherry_picked_from"] = serde_json::Value::from(rel.id.clone());
                let copy = engram_core::types::Relation {
                    id: new_id(),
                    branch: req.target.clone(),
                    properties,
                    ..rel
                };
                self.storage.insert_relation(&copy)?;
                counts.merged += 1;
            } else {
                return Err(EngramError::NotFound {
                    kind: "cherry-pick row",
                    id: id.clone(),
                });
            }
        }
        Ok(counts)
    }

    /// Collapse every source fact into one synthesized fact on the target:
    /// concatenated text, max confidence. No other entities are copied.
    async fn merge_squash(&self, req: &MergeRequest) -> Result<MergeCounts> {
        let facts = self
            .storage
            .list_facts(&req.source, Some(FactStatus::Active), None)?;
        if facts.is_empty() {
            return Ok(MergeCounts::default());
        }

        let mut texts: Vec<&str> = facts.iter().map(|f| f.text.as_str()).collect();
        texts.reverse(); // list_facts is newest-first; read oldest-first
        let text = texts.join("; ");
        let confidence = facts.iter().map(|f| f.confidence).fold(0.0f64, f64::max);

        let embedding = match self.embedder.embed(&text).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "squash embedding failed, writing null");
                None
            }
        };

        let now = now_rfc3339();
        let squashed = Fact {
            id: new_id(),
            text,
            category: "summary".to_string(),
            confidence,
            status: FactStatus::Active,
            parent_id: None,
            source_type: Some("squash".to_string()),
            source_id: None,
            session_id: None,
            task_id: None,
            agent_id: None,
            branch: req.target.clone(),
            embedding,
            metadata: serde_json::json!({
                "squashed_from": req.source,
                "fact_count": facts.len(),
            }),
            created_at: now.clone(),
            updated_at: now,
            superseded_at: None,
        };
        self.storage.insert_fact(&squashed)?;
        Ok(MergeCounts {
            merged: 1,
            skipped: 0,
            conflicted: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BranchEngine, CreateBranchOptions};
    use engram_embed::{EmbeddingProvider as _, MockEmbedding};

    async fn setup() -> (MergeEngine, BranchEngine, Arc<Storage>, Arc<MockEmbedding>) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let embedder = Arc::new(MockEmbedding::new(16));
        let merge = MergeEngine::new(storage.clone(), embedder.clone());
        let branches = BranchEngine::new(storage.clone());
        (merge, branches, storage, embedder)
    }

    async fn write_fact(
        storage: &Storage,
        embedder: &MockEmbedding,
        branch: &str,
        text: &str,
        confidence: f64,
    ) -> Fact {
        let fact = Fact {
            id: new_id(),
            text: text.to_string(),
            category: "general".to_string(),
            confidence,
            status: FactStatus::Active,
            parent_id: None,
            source_type: None,
            source_id: None,
            session_id: None,
            task_id: None,
            agent_id: None,
            branch: branch.to_string(),
            embedding: embedder.embed(text).await.ok(),
            metadata: serde_json::json!({}),
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
            superseded_at: None,
        };
        storage.insert_fact(&fact).unwrap();
        fact
    }

    fn request(strategy: MergeStrategy) -> MergeRequest {
        MergeRequest {
            source: "feature_y".to_string(),
            target: "main".to_string(),
            strategy,
            conflict: None,
            ids: None,
        }
    }

    #[tokio::test]
    async fn native_requires_a_policy() {
        let (merge, branches, _, _) = setup().await;
        branches
            .create("feature_y", "main", CreateBranchOptions::default())
            .unwrap();
        let err = merge
            .merge(&request(MergeStrategy::Native), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn native_skip_leaves_target_untouched() {
        let (merge, branches, storage, embedder) = setup().await;
        write_fact(&storage, &embedder, "main", "API uses snake_case", 0.8).await;
        branches
            .create("feature_y", "main", CreateBranchOptions::default())
            .unwrap();
        write_fact(&storage, &embedder, "feature_y", "API uses snake case fields", 0.9).await;

        let mut req = request(MergeStrategy::Native);
        req.conflict = Some(ConflictPolicy::Skip);
        let record = merge.merge(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(record.counts.merged, 0);
        assert_eq!(record.counts.skipped, 1);
        assert_eq!(storage.list_facts("main", None, None).unwrap().len(), 1);
        // history row appended
        assert_eq!(merge.history(Some("main")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn auto_flags_near_duplicates_as_conflicts() {
        let (merge, branches, storage, embedder) = setup().await;
        write_fact(&storage, &embedder, "main", "API uses snake_case", 0.8).await;
        branches
            .create("feature_y", "main", CreateBranchOptions { entities: Some(vec![]), ..Default::default() })
            .unwrap();
        // Same wording: mock embeddings are deterministic, cosine is 1.0.
        write_fact(&storage, &embedder, "feature_y", "API uses snake_case", 0.9).await;
        write_fact(&storage, &embedder, "feature_y", "deploys happen from CI only", 0.7).await;

        let record = merge
            .merge(&request(MergeStrategy::Auto), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.counts.conflicted, 1);
        assert_eq!(record.counts.skipped, 1);
        assert_eq!(record.counts.merged, 1);
        assert_eq!(storage.list_facts("main", None, None).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cherry_pick_copies_with_fresh_ids_and_backrefs() {
        let (merge, branches, storage, embedder) = setup().await;
        branches
            .create("feature_y", "main", CreateBranchOptions::default())
            .unwrap();
        let fact = write_fact(&storage, &embedder, "feature_y", "picked fact", 0.8).await;

        let mut req = request(MergeStrategy::CherryPick);
        req.ids = Some(vec![fact.id.clone()]);
        let record = merge.merge(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(record.counts.merged, 1);

        let on_main = storage.list_facts("main", None, None).unwrap();
        assert_eq!(on_main.len(), 1);
        assert_ne!(on_main[0].id, fact.id);
        assert_eq!(on_main[0].text, "picked fact");
        assert_eq!(
            on_main[0].metadata["cherry_picked_from"].as_str(),
            Some(fact.id.as_str())
        );
        // source untouched
        assert_eq!(storage.list_facts("feature_y", None, None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn squash_synthesizes_one_fact_with_max_confidence() {
        let (merge, branches, storage, embedder) = setup().await;
        branches
            .create("feature_y", "main", CreateBranchOptions { entities: Some(vec![]), ..Default::default() })
            .unwrap();
        write_fact(&storage, &embedder, "feature_y", "first finding", 0.6).await;
        write_fact(&storage, &embedder, "feature_y", "second finding", 0.9).await;

        let record = merge
            .merge(&request(MergeStrategy::Squash), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.counts.merged, 1);
        let on_main = storage.list_facts("main", None, None).unwrap();
        assert_eq!(on_main.len(), 1);
        assert!(on_main[0].text.contains("first finding"));
        assert!(on_main[0].text.contains("second finding"));
        assert!((on_main[0].confidence - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn unknown_source_is_a_not_found() {
        let (merge, _, _, _) = setup().await;
        let err = merge
            .merge(&request(MergeStrategy::Auto), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
