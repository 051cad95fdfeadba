use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use engram_core::error::Result;
use engram_core::types::{EntityKind, FactStatus};
use engram_embed::EmbeddingProvider;
use engram_storage::vector::cosine;
use engram_storage::Storage;

use crate::score::{
    temporal_bonus, ScoredFact, ScoredObservation, KEYWORD_WEIGHT, VECTOR_WEIGHT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Hybrid,
    Keyword,
    Vector,
}

impl Default for SearchMode {
    fn default() -> Self {
        SearchMode::Hybrid
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub branch: String,
    pub category: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub mode: SearchMode,
    /// Only rows younger than this many seconds are candidates.
    pub time_window_secs: Option<i64>,
}

fn default_limit() -> usize {
    10
}

/// Hybrid keyword + vector + recency ranking over one branch's facts.
///
/// Degrades gracefully: no FTS5 falls back to LIKE scoring inside the
/// storage adapter, an unreachable embedding provider zeroes the vector
/// component, and a row without an embedding contributes vector score 0.
pub struct SearchEngine {
    storage: Arc<Storage>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SearchEngine {
    pub fn new(storage: Arc<Storage>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { storage, embedder }
    }

    /// Embed the query once per search, best-effort. A failure drops the
    /// vector component instead of failing the request.
    async fn query_embedding(&self, query: &str, mode: SearchMode) -> Option<Vec<f32>> {
        if mode == SearchMode::Keyword {
            return None;
        }
        match self.embedder.embed(query).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "query embedding failed, vector component disabled");
                None
            }
        }
    }

    #[instrument(skip(self, q), fields(branch = %q.branch, mode = ?q.mode))]
    pub async fn search(&self, q: &SearchQuery) -> Result<Vec<ScoredFact>> {
        self.storage
            .get_branch(&q.branch)?
            .ok_or_else(|| engram_core::EngramError::not_found("branch", &q.branch))?;
        let keyword = match q.mode {
            SearchMode::Vector => HashMap::new(),
            _ => self
                .storage
                .keyword_scores(EntityKind::Fact, &q.branch, &q.query)?,
        };
        let query_vec = self.query_embedding(&q.query, q.mode).await;

        let now = chrono::Utc::now();
        let candidates =
            self.storage
                .list_facts(&q.branch, Some(FactStatus::Active), q.category.as_deref())?;

        let mut hits = Vec::new();
        for fact in candidates {
            if let Some(window) = q.time_window_secs {
                let bonus_age = chrono::DateTime::parse_from_rfc3339(&fact.created_at)
                    .map(|t| (now - t.with_timezone(&chrono::Utc)).num_seconds())
                    .unwrap_or(i64::MAX);
                if bonus_age > window {
                    continue;
                }
            }

            let keyword_score = if q.mode == SearchMode::Vector {
                0.0
            } else {
                keyword.get(&fact.id).copied().unwrap_or(0.0)
            };
            let vector_score = match (&query_vec, &fact.embedding, q.mode) {
                (_, _, SearchMode::Keyword) => 0.0,
                (Some(qv), Some(fv), _) => cosine(qv, fv),
                _ => 0.0,
            };
            let bonus = temporal_bonus(&fact.created_at, now);
            let score = KEYWORD_WEIGHT * keyword_score + VECTOR_WEIGHT * vector_score + bonus;
            if score > 0.0 {
                hits.push(ScoredFact {
                    fact,
                    score,
                    keyword_score,
                    vector_score,
                    temporal_bonus: bonus,
                });
            }
        }

        rank_facts(&mut hits);
        hits.truncate(q.limit);
        debug!(results = hits.len(), "search complete");
        Ok(hits)
    }

    /// Fan out the same query across several branches and merge a single
    /// top-K. Branch isolation holds: each branch is scanned separately.
    pub async fn search_cross_branch(
        &self,
        query: &str,
        branches: &[String],
        limit: usize,
    ) -> Result<Vec<ScoredFact>> {
        let mut all = Vec::new();
        for branch in branches {
            let q = SearchQuery {
                query: query.to_string(),
                branch: branch.clone(),
                category: None,
                limit,
                mode: SearchMode::Hybrid,
                time_window_secs: None,
            };
            all.extend(self.search(&q).await?);
        }
        rank_facts(&mut all);
        all.truncate(limit);
        Ok(all)
    }

    /// Same scoring pipeline against the observation table, with `summary`
    /// as the text field.
    #[instrument(skip(self), fields(branch))]
    pub async fn search_observations(
        &self,
        query: &str,
        branch: &str,
        limit: usize,
    ) -> Result<Vec<ScoredObservation>> {
        self.storage
            .get_branch(branch)?
            .ok_or_else(|| engram_core::EngramError::not_found("branch", branch))?;
        let keyword = self
            .storage
            .keyword_scores(EntityKind::Observation, branch, query)?;
        let query_vec = self.query_embedding(query, SearchMode::Hybrid).await;
        let now = chrono::Utc::now();

        let mut hits = Vec::new();
        for obs in self.storage.list_observations(branch, None)? {
            let keyword_score = keyword.get(&obs.id).copied().unwrap_or(0.0);
            let vector_score = match (&query_vec, &obs.embedding) {
                (Some(qv), Some(ov)) => cosine(qv, ov),
                _ => 0.0,
            };
            let bonus = temporal_bonus(&obs.created_at, now);
            let score = KEYWORD_WEIGHT * keyword_score + VECTOR_WEIGHT * vector_score + bonus;
            if score > 0.0 {
                hits.push(ScoredObservation {
                    observation: obs,
                    score,
                    keyword_score,
                    vector_score,
                    temporal_bonus: bonus,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.observation.created_at.cmp(&a.observation.created_at))
                .then_with(|| a.observation.id.cmp(&b.observation.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Score descending; ties break by created_at descending, then id.
fn rank_facts(hits: &mut [ScoredFact]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.fact.created_at.cmp(&a.fact.created_at))
            .then_with(|| a.fact.id.cmp(&b.fact.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::types::{new_id, now_rfc3339, Fact};
    use engram_embed::MockEmbedding;

    async fn seeded_engine() -> (SearchEngine, Arc<Storage>) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbedding::new(16));
        let engine = SearchEngine::new(storage.clone(), embedder.clone());
        for (text, category) in [
            ("auth middleware must accept Bearer tokens", "security"),
            ("API responses use snake_case field names", "pattern"),
            ("cache invalidation runs on deploy", "architecture"),
        ] {
            let embedding = embedder.embed(text).await.ok();
            storage
                .insert_fact(&Fact {
                    id: new_id(),
                    text: text.to_string(),
                    category: category.to_string(),
                    confidence: 0.8,
                    status: engram_core::types::FactStatus::Active,
                    parent_id: None,
                    source_type: None,
                    source_id: None,
                    session_id: None,
                    task_id: None,
                    agent_id: None,
                    branch: "main".to_string(),
                    embedding,
                    metadata: serde_json::json!({}),
                    created_at: now_rfc3339(),
                    updated_at: now_rfc3339(),
                    superseded_at: None,
                })
                .unwrap();
        }
        (engine, storage)
    }

    fn query(text: &str, mode: SearchMode) -> SearchQuery {
        SearchQuery {
            query: text.to_string(),
            branch: "main".to_string(),
            category: None,
            limit: 10,
            mode,
            time_window_secs: None,
        }
    }

    #[tokio::test]
    async fn hybrid_ranks_the_matching_fact_first() {
        let (engine, _) = seeded_engine().await;
        let hits = engine
            .search(&query("Bearer tokens auth middleware", SearchMode::Hybrid))
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].fact.text.contains("Bearer"));
        assert!(hits[0].score > 0.5);
    }

    #[tokio::test]
    async fn keyword_mode_zeroes_the_vector_component() {
        let (engine, _) = seeded_engine().await;
        let hits = engine
            .search(&query("snake_case field names", SearchMode::Keyword))
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.vector_score == 0.0));
        assert!(hits[0].fact.text.contains("snake_case"));
    }

    #[tokio::test]
    async fn vector_mode_zeroes_the_keyword_component() {
        let (engine, _) = seeded_engine().await;
        let hits = engine
            .search(&query("cache invalidation deploy", SearchMode::Vector))
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.keyword_score == 0.0));
        assert!(hits[0].fact.text.contains("cache"));
    }

    fn register_branch(storage: &Storage, name: &str) {
        storage
            .insert_branch(&engram_core::types::Branch {
                name: name.to_string(),
                parent: Some("main".to_string()),
                status: engram_core::types::BranchStatus::Active,
                description: None,
                metadata: serde_json::json!({}),
                created_at: now_rfc3339(),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn results_never_leak_across_branches() {
        let (engine, storage) = seeded_engine().await;
        register_branch(&storage, "feature_x");
        storage
            .fork_table(EntityKind::Fact, "facts", "facts_feature_x", "feature_x", false)
            .unwrap();
        let hits = engine
            .search(&SearchQuery {
                branch: "feature_x".to_string(),
                ..query("Bearer tokens", SearchMode::Hybrid)
            })
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn cross_branch_merges_per_branch_results() {
        let (engine, storage) = seeded_engine().await;
        register_branch(&storage, "feature_x");
        storage
            .fork_table(EntityKind::Fact, "facts", "facts_feature_x", "feature_x", true)
            .unwrap();
        let hits = engine
            .search_cross_branch(
                "Bearer tokens",
                &["main".to_string(), "feature_x".to_string()],
                10,
            )
            .await
            .unwrap();
        let branches: std::collections::HashSet<_> =
            hits.iter().map(|h| h.fact.branch.clone()).collect();
        assert!(branches.contains("main"));
        assert!(branches.contains("feature_x"));
    }
}
