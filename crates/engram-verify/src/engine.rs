use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use engram_core::error::Result;
use engram_core::types::{
    new_id, now_rfc3339, Fact, FactStatus, Score, Scorer, VerificationStatus,
};
use engram_core::EngramError;
use engram_storage::Storage;

use crate::judge::LlmJudge;

/// The three quality dimensions every fact is judged on.
pub const DIMENSIONS: [&str; 3] = ["accuracy", "relevance", "specificity"];

/// Average score at or above which a fact is verified.
const VERIFIED_THRESHOLD: f64 = 0.6;
/// Average score below which a fact is invalidated.
const INVALIDATED_THRESHOLD: f64 = 0.3;
/// Specificity heuristic target: about eight words of ~20 chars.
const SPECIFICITY_TARGET_CHARS: f64 = 160.0;

#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub fact_id: String,
    pub verdict: VerificationStatus,
    pub scores: HashMap<String, f64>,
    pub scorer: Scorer,
}

/// Scores facts for quality and stamps their metadata. The judge is
/// optional; the heuristic path keeps verification available offline.
pub struct VerificationEngine {
    storage: Arc<Storage>,
    judge: Option<Arc<dyn LlmJudge>>,
}

impl VerificationEngine {
    pub fn new(storage: Arc<Storage>, judge: Option<Arc<dyn LlmJudge>>) -> Self {
        Self { storage, judge }
    }

    /// Judge one fact, falling back to heuristics when the judge is absent
    /// or failing. The fact's metadata gains `verification_status`,
    /// `verified_at` and the score list; score rows are appended.
    #[instrument(skip(self), fields(branch, id))]
    pub async fn verify_fact(&self, branch: &str, id: &str) -> Result<VerificationOutcome> {
        let fact = self
            .storage
            .get_fact(branch, id)?
            .ok_or_else(|| EngramError::not_found("fact", id))?;

        let (scores, scorer) = match &self.judge {
            Some(judge) => {
                let prompt = judge_prompt(&fact);
                match judge.score(&prompt, &DIMENSIONS).await {
                    Ok(s) => (s, Scorer::LlmJudge),
                    Err(e) => {
                        warn!(judge = judge.name(), error = %e, "judge failed, using heuristics");
                        (heuristic_scores(&fact), Scorer::Heuristic)
                    }
                }
            }
            None => (heuristic_scores(&fact), Scorer::Heuristic),
        };

        let avg = scores.values().sum::<f64>() / scores.len().max(1) as f64;
        let verdict = if avg >= VERIFIED_THRESHOLD {
            VerificationStatus::Verified
        } else if avg < INVALIDATED_THRESHOLD {
            VerificationStatus::Invalidated
        } else {
            VerificationStatus::Unverified
        };

        self.stamp(branch, &fact, verdict, &scores, scorer)?;
        debug!(verdict = %verdict, avg, "fact verified");
        Ok(VerificationOutcome {
            fact_id: fact.id,
            verdict,
            scores,
            scorer,
        })
    }

    /// Verify every active fact on a branch.
    #[instrument(skip(self, cancel), fields(branch))]
    pub async fn batch_verify(
        &self,
        branch: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<VerificationOutcome>> {
        let facts = self.storage.list_facts(branch, Some(FactStatus::Active), None)?;
        let mut out = Vec::with_capacity(facts.len());
        for fact in facts {
            if cancel.is_cancelled() {
                return Err(EngramError::Cancelled);
            }
            out.push(self.verify_fact(branch, &fact.id).await?);
        }
        Ok(out)
    }

    /// Human override: set the verification status directly.
    pub fn set_verification(
        &self,
        branch: &str,
        id: &str,
        status: VerificationStatus,
    ) -> Result<()> {
        let fact = self
            .storage
            .get_fact(branch, id)?
            .ok_or_else(|| EngramError::not_found("fact", id))?;
        self.stamp(branch, &fact, status, &HashMap::new(), Scorer::Human)
    }

    fn stamp(
        &self,
        branch: &str,
        fact: &Fact,
        verdict: VerificationStatus,
        scores: &HashMap<String, f64>,
        scorer: Scorer,
    ) -> Result<()> {
        let now = now_rfc3339();
        let mut metadata = fact.metadata.clone();
        metadata["verification_status"] = serde_json::Value::from(verdict.to_string());
        metadata["verified_at"] = serde_json::Value::from(now.clone());
        let mut history = metadata["scores"].as_array().cloned().unwrap_or_default();
        history.push(serde_json::json!({
            "scorer": scorer.to_string(),
            "scores": scores,
            "at": now,
        }));
        metadata["scores"] = serde_json::Value::from(history);
        self.storage.update_fact_metadata(branch, &fact.id, &metadata)?;

        for (dimension, value) in scores {
            self.storage.insert_score(&Score {
                id: new_id(),
                target_type: "fact".to_string(),
                target_id: fact.id.clone(),
                dimension: dimension.clone(),
                value: *value,
                scorer,
                explanation: None,
                created_at: now_rfc3339(),
            })?;
        }
        Ok(())
    }
}

fn judge_prompt(fact: &Fact) -> String {
    format!(
        "Fact: {}\nCategory: {}\nStated confidence: {:.2}\n\
         Judge whether this is accurate, relevant engineering knowledge, \
         and specific enough to act on.",
        fact.text, fact.category, fact.confidence
    )
}

/// Offline scoring when no judge is reachable.
fn heuristic_scores(fact: &Fact) -> HashMap<String, f64> {
    let mut scores = HashMap::new();
    scores.insert("accuracy".to_string(), fact.confidence);
    scores.insert(
        "relevance".to_string(),
        if matches!(fact.category.as_str(), "bug_fix" | "architecture") {
            0.7
        } else {
            0.5
        },
    );
    scores.insert(
        "specificity".to_string(),
        (fact.text.chars().count() as f64 / SPECIFICITY_TARGET_CHARS).min(1.0),
    );
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn fact(id: &str, text: &str, category: &str, confidence: f64) -> Fact {
        let now = now_rfc3339();
        Fact {
            id: id.to_string(),
            text: text.to_string(),
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
        }
    }

    struct FixedJudge(f64);

    #[async_trait]
    impl LlmJudge for FixedJudge {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn score(
            &self,
            _prompt: &str,
            dimensions: &[&str],
        ) -> std::result::Result<HashMap<String, f64>, crate::judge::JudgeError> {
            Ok(dimensions.iter().map(|d| (d.to_string(), self.0)).collect())
        }
    }

    struct BrokenJudge;

    #[async_trait]
    impl LlmJudge for BrokenJudge {
        fn name(&self) -> &str {
            "broken"
        }
        async fn score(
            &self,
            _prompt: &str,
            _dimensions: &[&str],
        ) -> std::result::Result<HashMap<String, f64>, crate::judge::JudgeError> {
            Err(crate::judge::JudgeError::Parse("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn judge_scores_drive_the_verdict() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        storage.insert_fact(&fact("f-1", "high quality fact", "security", 0.9)).unwrap();
        storage.insert_fact(&fact("f-2", "middling fact", "general", 0.5)).unwrap();

        let good = VerificationEngine::new(storage.clone(), Some(Arc::new(FixedJudge(0.8))));
        let outcome = good.verify_fact("main", "f-1").await.unwrap();
        assert_eq!(outcome.verdict, VerificationStatus::Verified);
        assert_eq!(outcome.scorer, Scorer::LlmJudge);

        let meh = VerificationEngine::new(storage.clone(), Some(Arc::new(FixedJudge(0.4))));
        let outcome = meh.verify_fact("main", "f-2").await.unwrap();
        assert_eq!(outcome.verdict, VerificationStatus::Unverified);

        let stamped = storage.get_fact("main", "f-1").unwrap().unwrap();
        assert_eq!(
            stamped.metadata["verification_status"].as_str(),
            Some("verified")
        );
        assert!(!storage.list_scores("fact", "f-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn broken_judge_falls_back_to_heuristics() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        storage
            .insert_fact(&fact(
                "f-1",
                "auth middleware rejects expired bearer tokens with a 401 response",
                "bug_fix",
                0.9,
            ))
            .unwrap();
        let engine = VerificationEngine::new(storage.clone(), Some(Arc::new(BrokenJudge)));
        let outcome = engine.verify_fact("main", "f-1").await.unwrap();
        assert_eq!(outcome.scorer, Scorer::Heuristic);
        // accuracy 0.9, relevance 0.7, specificity ~0.4 → avg ≥ 0.6
        assert_eq!(outcome.verdict, VerificationStatus::Verified);
    }

    #[tokio::test]
    async fn heuristic_specificity_tracks_text_length() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        storage.insert_fact(&fact("f-1", "tiny", "general", 0.5)).unwrap();
        let engine = VerificationEngine::new(storage.clone(), None);
        let outcome = engine.verify_fact("main", "f-1").await.unwrap();
        assert!(outcome.scores["specificity"] < 0.05);
        // (0.5 + 0.5 + ~0.03) / 3 lands between the two thresholds
        assert_eq!(outcome.verdict, VerificationStatus::Unverified);

        storage.insert_fact(&fact("f-2", "worthless", "general", 0.1)).unwrap();
        let outcome = engine.verify_fact("main", "f-2").await.unwrap();
        assert_eq!(outcome.verdict, VerificationStatus::Invalidated);
    }

    #[tokio::test]
    async fn human_override_stamps_status() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        storage.insert_fact(&fact("f-1", "anything", "general", 0.5)).unwrap();
        let engine = VerificationEngine::new(storage.clone(), None);
        engine
            .set_verification("main", "f-1", VerificationStatus::Verified)
            .unwrap();
        let stamped = storage.get_fact("main", "f-1").unwrap().unwrap();
        assert_eq!(
            stamped.metadata["verification_status"].as_str(),
            Some("verified")
        );
    }
}
