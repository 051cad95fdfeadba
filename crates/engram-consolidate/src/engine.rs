use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use engram_core::error::Result;
use engram_core::types::{
    new_id, now_rfc3339, ConsolidationLevel, ConsolidationRecord, Fact, FactStatus,
    ObservationType, DURABLE_CATEGORIES,
};
use engram_core::EngramError;
use engram_storage::text::{jaccard, tokenize};
use engram_storage::Storage;

use crate::category::infer_category;
use crate::dedup::{group_near_duplicates, SIMILARITY_THRESHOLD};

/// Confidence assigned to a fact freshly distilled from observations.
const INITIAL_CONFIDENCE: f64 = 0.7;
/// Boost applied per duplicate collision, clamped to 1.0.
const DEDUP_BOOST: f64 = 0.1;

/// Observation types that carry distillable knowledge; tool_use noise is
/// left in the sensory log.
const DISTILLABLE: [ObservationType; 4] = [
    ObservationType::Insight,
    ObservationType::Decision,
    ObservationType::Discovery,
    ObservationType::Error,
];

/// Result of a task-level run: classification, not mutation.
#[derive(Debug, Clone)]
pub struct TaskConsolidation {
    pub record: ConsolidationRecord,
    pub durable: Vec<Fact>,
    pub ephemeral: Vec<Fact>,
}

pub struct ConsolidationEngine {
    storage: Arc<Storage>,
}

impl ConsolidationEngine {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Session level: distill one session's observations into facts on the
    /// same branch. Repeated knowledge boosts the existing fact's
    /// confidence (+0.1, once per fact per run); fresh knowledge becomes a
    /// new fact at 0.7. The audit row is appended even when there was
    /// nothing to process.
    #[instrument(skip(self, cancel), fields(branch, session_id))]
    pub fn consolidate_session(
        &self,
        branch: &str,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ConsolidationRecord> {
        let observations: Vec<_> = self
            .storage
            .list_observations(branch, Some(session_id))?
            .into_iter()
            .filter(|o| DISTILLABLE.contains(&o.obs_type))
            .collect();

        let existing = self.storage.list_facts(branch, Some(FactStatus::Active), None)?;
        let mut fact_tokens: Vec<(String, Vec<String>)> = existing
            .iter()
            .map(|f| (f.id.clone(), tokenize(&f.text)))
            .collect();
        let mut confidences: std::collections::HashMap<String, f64> =
            existing.iter().map(|f| (f.id.clone(), f.confidence)).collect();

        let mut created = 0u64;
        let mut updated = 0u64;
        let mut deduplicated = 0u64;
        let mut created_this_run: HashSet<String> = HashSet::new();
        let mut boosted_this_run: HashSet<String> = HashSet::new();

        for obs in &observations {
            if cancel.is_cancelled() {
                return Err(EngramError::Cancelled);
            }
            let tokens = tokenize(&obs.summary);
            let duplicate_of = fact_tokens
                .iter()
                .map(|(id, ft)| (id.clone(), jaccard(&tokens, ft)))
                .filter(|(_, sim)| *sim >= SIMILARITY_THRESHOLD)
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(id, _)| id);

            match duplicate_of {
                Some(fact_id) => {
                    deduplicated += 1;
                    // Facts born in this run are deduplicated without a
                    // boost; pre-existing facts are boosted at most once
                    // per run.
                    if !created_this_run.contains(&fact_id) && boosted_this_run.insert(fact_id.clone())
                    {
                        let boosted = (confidences.get(&fact_id).copied().unwrap_or(0.5)
                            + DEDUP_BOOST)
                            .min(1.0);
                        self.storage.update_fact_confidence(branch, &fact_id, boosted)?;
                        confidences.insert(fact_id, boosted);
                        updated += 1;
                    }
                }
                None => {
                    let now = now_rfc3339();
                    let fact = Fact {
                        id: new_id(),
                        text: obs.summary.clone(),
                        category: infer_category(obs),
                        confidence: INITIAL_CONFIDENCE,
                        status: FactStatus::Active,
                        parent_id: None,
                        source_type: Some("consolidation".to_string()),
                        source_id: Some(obs.id.clone()),
                        session_id: Some(obs.session_id.clone()),
                        task_id: obs.task_id.clone(),
                        agent_id: obs.agent_id.clone(),
                        branch: branch.to_string(),
                        // The observation embedding covers the same summary
                        // text, so reuse it instead of another provider call.
                        embedding: obs.embedding.clone(),
                        metadata: serde_json::json!({}),
                        created_at: now.clone(),
                        updated_at: now,
                        superseded_at: None,
                    };
                    self.storage.insert_fact(&fact)?;
                    fact_tokens.push((fact.id.clone(), tokens));
                    confidences.insert(fact.id.clone(), fact.confidence);
                    created_this_run.insert(fact.id.clone());
                    created += 1;
                }
            }
        }

        let record = self.record(
            ConsolidationLevel::Session,
            branch,
            branch,
            created,
            updated,
            deduplicated,
            observations.len() as u64,
            format!(
                "session {session_id}: {created} facts created, {updated} boosted, {deduplicated} duplicates"
            ),
        )?;
        info!(created, updated, deduplicated, "session consolidation complete");
        Ok(record)
    }

    /// Agent level: union-find the branch's active facts into near-
    /// duplicate groups, keep the highest-confidence representative of
    /// each, supersede the rest, and emit one agent summary fact.
    #[instrument(skip(self, cancel), fields(branch))]
    pub fn consolidate_agent(
        &self,
        branch: &str,
        agent_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ConsolidationRecord> {
        let facts = self.storage.list_facts(branch, Some(FactStatus::Active), None)?;
        let texts: Vec<&str> = facts.iter().map(|f| f.text.as_str()).collect();
        let groups = group_near_duplicates(&texts);

        let mut updated = 0u64;
        let mut deduplicated = 0u64;
        let mut kept = 0u64;

        for group in &groups {
            if cancel.is_cancelled() {
                return Err(EngramError::Cancelled);
            }
            kept += 1;
            if group.len() == 1 {
                continue;
            }
            let representative = group
                .iter()
                .copied()
                .max_by(|a, b| {
                    facts[*a]
                        .confidence
                        .partial_cmp(&facts[*b].confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("non-empty group");

            let duplicates = group.len() as u64 - 1;
            let boosted = (facts[representative].confidence
                + DEDUP_BOOST * duplicates as f64)
                .min(1.0);
            self.storage
                .update_fact_confidence(branch, &facts[representative].id, boosted)?;
            updated += 1;

            for &i in group {
                if i == representative {
                    continue;
                }
                self.storage
                    .update_fact_status(branch, &facts[i].id, FactStatus::Superseded)?;
                deduplicated += 1;
            }
        }

        // One summary fact describing what survived.
        let mut created = 0u64;
        if !facts.is_empty() {
            let label = agent_id.unwrap_or("agent");
            let now = now_rfc3339();
            let summary_fact = Fact {
                id: new_id(),
                text: format!(
                    "{label} retained {kept} facts after deduplicating {deduplicated} near-duplicates"
                ),
                category: "summary".to_string(),
                confidence: INITIAL_CONFIDENCE,
                status: FactStatus::Active,
                parent_id: None,
                source_type: Some("consolidation".to_string()),
                source_id: None,
                session_id: None,
                task_id: None,
                agent_id: agent_id.map(String::from),
                branch: branch.to_string(),
                embedding: None,
                metadata: serde_json::json!({ "agent_summary": true }),
                created_at: now.clone(),
                updated_at: now,
                superseded_at: None,
            };
            self.storage.insert_fact(&summary_fact)?;
            created = 1;
        }

        let record = self.record(
            ConsolidationLevel::Agent,
            branch,
            branch,
            created,
            updated,
            deduplicated,
            0,
            format!("agent pass: {kept} groups kept, {deduplicated} duplicates superseded"),
        )?;
        debug!(kept, deduplicated, "agent consolidation complete");
        Ok(record)
    }

    /// Task level: classify every active fact as durable (confidence ≥ 0.8
    /// and a promotion-set category) or ephemeral. Classification only;
    /// promotion is the merge engine's job, behind the merge gate.
    #[instrument(skip(self), fields(branch))]
    pub fn consolidate_task(&self, branch: &str) -> Result<TaskConsolidation> {
        let facts = self.storage.list_facts(branch, Some(FactStatus::Active), None)?;
        let (durable, ephemeral): (Vec<Fact>, Vec<Fact>) = facts.into_iter().partition(|f| {
            f.confidence >= 0.8 && DURABLE_CATEGORIES.contains(&f.category.as_str())
        });

        for fact in durable.iter().chain(ephemeral.iter()) {
            let mut metadata = fact.metadata.clone();
            metadata["durability"] = serde_json::Value::from(if durable.iter().any(|d| d.id == fact.id) {
                "durable"
            } else {
                "ephemeral"
            });
            self.storage.update_fact_metadata(branch, &fact.id, &metadata)?;
        }

        let record = self.record(
            ConsolidationLevel::Task,
            branch,
            branch,
            0,
            (durable.len() + ephemeral.len()) as u64,
            0,
            0,
            format!("task pass: {} durable, {} ephemeral", durable.len(), ephemeral.len()),
        )?;
        Ok(TaskConsolidation {
            record,
            durable,
            ephemeral,
        })
    }

    pub fn history(&self, branch: Option<&str>) -> Result<Vec<ConsolidationRecord>> {
        self.storage.list_consolidation_records(branch)
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        level: ConsolidationLevel,
        source_branch: &str,
        target_branch: &str,
        created_count: u64,
        updated_count: u64,
        deduplicated_count: u64,
        observations_processed: u64,
        summary: String,
    ) -> Result<ConsolidationRecord> {
        let record = ConsolidationRecord {
            id: new_id(),
            level,
            source_branch: source_branch.to_string(),
            target_branch: target_branch.to_string(),
            created_count,
            updated_count,
            deduplicated_count,
            observations_processed,
            summary: Some(summary),
            created_at: now_rfc3339(),
        };
        self.storage.insert_consolidation_record(&record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::types::{Observation, Outcome};

    fn engine() -> (ConsolidationEngine, Arc<Storage>) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        (ConsolidationEngine::new(storage.clone()), storage)
    }

    fn obs(id: &str, session: &str, summary: &str, obs_type: ObservationType) -> Observation {
        Observation {
            id: id.to_string(),
            session_id: session.to_string(),
            obs_type,
            tool_name: None,
            summary: summary.to_string(),
            raw_input: None,
            raw_output: None,
            outcome: Outcome::Success,
            branch: "main".to_string(),
            task_id: None,
            agent_id: None,
            embedding: None,
            created_at: now_rfc3339(),
        }
    }

    #[test]
    fn empty_input_still_appends_history() {
        let (engine, _) = engine();
        let record = engine
            .consolidate_session("main", "s-none", &CancellationToken::new())
            .unwrap();
        assert_eq!(record.created_count, 0);
        assert_eq!(engine.history(Some("main")).unwrap().len(), 1);
    }

    #[test]
    fn near_duplicate_observations_produce_one_fact_then_boost() {
        let (engine, storage) = engine();
        storage
            .insert_observation(&obs(
                "o-1",
                "s-1",
                "bearer auth skipped when api key present",
                ObservationType::Insight,
            ))
            .unwrap();
        storage
            .insert_observation(&obs(
                "o-2",
                "s-1",
                "bearer auth skipped when api key is present",
                ObservationType::Discovery,
            ))
            .unwrap();

        let first = engine
            .consolidate_session("main", "s-1", &CancellationToken::new())
            .unwrap();
        assert_eq!(first.created_count, 1);
        assert_eq!(first.deduplicated_count, 1);

        let facts = storage.list_facts("main", Some(FactStatus::Active), None).unwrap();
        assert_eq!(facts.len(), 1);
        assert!((facts[0].confidence - 0.7).abs() < f64::EPSILON);

        // Second pass: no new fact, one boost to 0.8 despite two matches.
        let second = engine
            .consolidate_session("main", "s-1", &CancellationToken::new())
            .unwrap();
        assert_eq!(second.created_count, 0);
        assert_eq!(second.updated_count, 1);
        let facts = storage.list_facts("main", Some(FactStatus::Active), None).unwrap();
        assert!((facts[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn tool_use_observations_are_not_distilled() {
        let (engine, storage) = engine();
        storage
            .insert_observation(&obs("o-1", "s-1", "ran ls", ObservationType::ToolUse))
            .unwrap();
        let record = engine
            .consolidate_session("main", "s-1", &CancellationToken::new())
            .unwrap();
        assert_eq!(record.observations_processed, 0);
        assert_eq!(record.created_count, 0);
    }

    #[test]
    fn keyword_category_inference_applies() {
        let (engine, storage) = engine();
        storage
            .insert_observation(&obs(
                "o-1",
                "s-1",
                "fixed crash in pagination bug handler",
                ObservationType::Insight,
            ))
            .unwrap();
        engine
            .consolidate_session("main", "s-1", &CancellationToken::new())
            .unwrap();
        let facts = storage.list_facts("main", None, None).unwrap();
        assert_eq!(facts[0].category, "bug_fix");
    }

    #[test]
    fn agent_pass_keeps_highest_confidence_representative() {
        let (engine, storage) = engine();
        for (id, text, confidence) in [
            ("f-1", "retry budget is three attempts per call", 0.6),
            ("f-2", "retry budget is three attempts per call today", 0.9),
            ("f-3", "unrelated deployment note", 0.5),
        ] {
            let now = now_rfc3339();
            storage
                .insert_fact(&Fact {
                    id: id.to_string(),
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
                    branch: "main".to_string(),
                    embedding: None,
                    metadata: serde_json::json!({}),
                    created_at: now.clone(),
                    updated_at: now,
                    superseded_at: None,
                })
                .unwrap();
        }

        let record = engine
            .consolidate_agent("main", Some("agent_1"), &CancellationToken::new())
            .unwrap();
        assert_eq!(record.deduplicated_count, 1);

        let f1 = storage.get_fact("main", "f-1").unwrap().unwrap();
        let f2 = storage.get_fact("main", "f-2").unwrap().unwrap();
        assert_eq!(f1.status, FactStatus::Superseded);
        assert_eq!(f2.status, FactStatus::Active);
        assert!((f2.confidence - 1.0).abs() < f64::EPSILON);

        // summary fact emitted
        let facts = storage.list_facts("main", Some(FactStatus::Active), None).unwrap();
        assert!(facts.iter().any(|f| f.metadata["agent_summary"] == true));
    }

    #[test]
    fn task_pass_classifies_durable_vs_ephemeral() {
        let (engine, storage) = engine();
        for (id, category, confidence) in [
            ("f-1", "security", 0.9),
            ("f-2", "security", 0.5),
            ("f-3", "general", 0.95),
        ] {
            let now = now_rfc3339();
            storage
                .insert_fact(&Fact {
                    id: id.to_string(),
                    text: format!("fact {id}"),
                    category: category.to_string(),
                    confidence,
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
                })
                .unwrap();
        }

        let result = engine.consolidate_task("main").unwrap();
        assert_eq!(result.durable.len(), 1);
        assert_eq!(result.durable[0].id, "f-1");
        assert_eq!(result.ephemeral.len(), 2);
    }
}
