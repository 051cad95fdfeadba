use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, instrument};

use engram_core::error::Result;
use engram_core::types::{
    new_id, now_rfc3339, Fact, FactStatus, Handoff, VerificationStatus,
};
use engram_core::EngramError;
use engram_storage::Storage;

/// Most facts a handoff carries; verified facts win the cut.
const MAX_HANDOFF_FACTS: usize = 50;

pub struct HandoffEngine {
    storage: Arc<Storage>,
}

impl HandoffEngine {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Package a curated subset of the source branch for the agent working
    /// on the target branch: verified facts first, recent conversations,
    /// and a generated context summary.
    #[instrument(skip(self), fields(source_branch, target_branch))]
    pub fn create(
        &self,
        source_branch: &str,
        target_branch: &str,
        handoff_type: &str,
    ) -> Result<Handoff> {
        self.storage
            .get_branch(source_branch)?
            .ok_or_else(|| EngramError::not_found("source branch", source_branch))?;
        self.storage
            .get_branch(target_branch)?
            .ok_or_else(|| EngramError::not_found("target branch", target_branch))?;

        let mut facts = self
            .storage
            .list_facts(source_branch, Some(FactStatus::Active), None)?;
        // Verified first, then by confidence.
        facts.sort_by(|a, b| {
            let rank = |f: &Fact| {
                (
                    verification_of(f) != VerificationStatus::Verified,
                    std::cmp::Reverse((f.confidence * 1000.0) as i64),
                )
            };
            rank(a).cmp(&rank(b))
        });
        facts.truncate(MAX_HANDOFF_FACTS);

        let all_verified =
            !facts.is_empty() && facts.iter().all(|f| verification_of(f) == VerificationStatus::Verified);
        let conversations = self.storage.list_conversations(source_branch, None)?;

        let handoff = Handoff {
            id: new_id(),
            source_branch: source_branch.to_string(),
            target_branch: target_branch.to_string(),
            handoff_type: handoff_type.to_string(),
            facts: serde_json::to_string(&facts)?,
            conversations: serde_json::to_string(&conversations)?,
            context_summary: summarize(source_branch, &facts),
            verification_status: if all_verified {
                VerificationStatus::Verified
            } else {
                VerificationStatus::Unverified
            },
            created_at: now_rfc3339(),
        };
        self.storage.insert_handoff(&handoff)?;
        info!(id = %handoff.id, facts = facts.len(), "handoff created");
        Ok(handoff)
    }

    pub fn get(&self, id: &str) -> Result<Handoff> {
        self.storage
            .get_handoff(id)?
            .ok_or_else(|| EngramError::not_found("handoff", id))
    }
}

fn verification_of(fact: &Fact) -> VerificationStatus {
    fact.metadata["verification_status"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or(VerificationStatus::Unverified)
}

/// Plain-text digest of what the handoff carries, grouped by category.
fn summarize(source_branch: &str, facts: &[Fact]) -> String {
    let mut by_category: BTreeMap<&str, usize> = BTreeMap::new();
    for fact in facts {
        *by_category.entry(fact.category.as_str()).or_default() += 1;
    }
    let breakdown: Vec<String> = by_category
        .iter()
        .map(|(cat, n)| format!("{n} {cat}"))
        .collect();
    format!(
        "{} facts from '{source_branch}' ({})",
        facts.len(),
        breakdown.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(id: &str, category: &str, verified: bool, confidence: f64) -> Fact {
        let now = now_rfc3339();
        Fact {
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
            metadata: if verified {
                serde_json::json!({ "verification_status": "verified" })
            } else {
                serde_json::json!({})
            },
            created_at: now.clone(),
            updated_at: now,
            superseded_at: None,
        }
    }

    #[test]
    fn verified_facts_lead_and_status_reflects_the_mix() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let engine = HandoffEngine::new(storage.clone());
        storage.insert_fact(&fact("f-1", "security", false, 0.9)).unwrap();
        storage.insert_fact(&fact("f-2", "bug_fix", true, 0.7)).unwrap();

        let handoff = engine.create("main", "main", "context_transfer").unwrap();
        let facts: Vec<Fact> = serde_json::from_str(&handoff.facts).unwrap();
        assert_eq!(facts[0].id, "f-2");
        assert_eq!(handoff.verification_status, VerificationStatus::Unverified);
        assert!(handoff.context_summary.contains("2 facts"));

        let loaded = engine.get(&handoff.id).unwrap();
        assert_eq!(loaded.source_branch, "main");
    }
}
