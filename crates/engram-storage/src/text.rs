use std::collections::{HashMap, HashSet};

use engram_core::error::Result;
use engram_core::types::EntityKind;

use crate::db::fulltext_column;
use crate::naming::{fts_table_for, table_for};
use crate::store::Storage;

/// Lowercase word tokens, split on every non-alphanumeric character.
/// This tokenizer is shared by keyword scoring and consolidation dedup so
/// both sides agree on what a "word" is.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Token-set Jaccard similarity in [0, 1]. Empty inputs score 0.
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    let sa: HashSet<&str> = a.iter().map(|s| s.as_str()).collect();
    let sb: HashSet<&str> = b.iter().map(|s| s.as_str()).collect();
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count() as f64;
    let union = sa.union(&sb).count() as f64;
    inter / union
}

impl Storage {
    /// FULLTEXT-MATCH: keyword relevance per row id, normalized to [0, 1].
    ///
    /// Uses the FTS5 index (BM25 rank folded into [0, 1)) when available,
    /// otherwise scans LIKE-matched rows and scores them by token overlap
    /// with the query. Rows that match nothing are absent from the map.
    pub fn keyword_scores(
        &self,
        entity: EntityKind,
        branch: &str,
        query: &str,
    ) -> Result<HashMap<String, f64>> {
        let Some(col) = fulltext_column(entity) else {
            return Ok(HashMap::new());
        };
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(HashMap::new());
        }
        let table = table_for(entity, branch);
        if self.fulltext_enabled() {
            self.fts_scores(&table, &tokens)
        } else {
            self.like_scores(&table, col, &tokens)
        }
    }

    fn fts_scores(&self, table: &str, tokens: &[String]) -> Result<HashMap<String, f64>> {
        let fts = fts_table_for(table);
        // Quote each token so user punctuation can't inject FTS operators.
        let match_expr = tokens
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR ");

        let conn = self.main.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT t.id, bm25({fts}) FROM {fts}
             JOIN {table} t ON t.rowid = {fts}.rowid
             WHERE {fts} MATCH ?1"
        ))?;
        let rows = stmt.query_map(rusqlite::params![match_expr], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut out = HashMap::new();
        for r in rows {
            let (id, rank) = r?;
            // bm25() is negative-better; fold into [0, 1).
            let raw = (-rank).max(0.0);
            out.insert(id, raw / (raw + 1.0));
        }
        Ok(out)
    }

    fn like_scores(
        &self,
        table: &str,
        col: &str,
        tokens: &[String],
    ) -> Result<HashMap<String, f64>> {
        let clauses = (1..=tokens.len())
            .map(|i| format!("lower({col}) LIKE ?{i}"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let patterns: Vec<String> = tokens.iter().map(|t| format!("%{t}%")).collect();

        let conn = self.main.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT id, {col} FROM {table} WHERE {clauses}"))?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(patterns.iter()),
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;

        let mut out = HashMap::new();
        for r in rows {
            let (id, text) = r?;
            let score = jaccard(tokens, &tokenize(&text));
            if score > 0.0 {
                out.insert(id, score);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::types::{now_rfc3339, Fact, FactStatus};

    #[test]
    fn tokenize_splits_on_non_alphanumeric() {
        assert_eq!(tokenize("Bearer-token, ignored!"), vec!["bearer", "token", "ignored"]);
        assert!(tokenize("...").is_empty());
    }

    #[test]
    fn jaccard_bounds() {
        let a = tokenize("auth middleware accepts bearer tokens");
        let b = tokenize("auth middleware accepts bearer tokens");
        assert!((jaccard(&a, &b) - 1.0).abs() < f64::EPSILON);
        let c = tokenize("completely unrelated words here");
        assert!(jaccard(&a, &c) < 0.2);
        assert_eq!(jaccard(&a, &[]), 0.0);
    }

    fn seed_fact(store: &Storage, id: &str, text: &str) {
        let now = now_rfc3339();
        store
            .insert_fact(&Fact {
                id: id.to_string(),
                text: text.to_string(),
                category: "general".to_string(),
                confidence: 0.5,
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

    #[test]
    fn keyword_scores_rank_matching_rows() {
        let store = Storage::open_in_memory().unwrap();
        seed_fact(&store, "f-1", "bearer tokens required by the auth middleware");
        seed_fact(&store, "f-2", "deploys run from continuous integration only");

        let scores = store
            .keyword_scores(engram_core::types::EntityKind::Fact, "main", "bearer tokens")
            .unwrap();
        let hit = scores.get("f-1").copied().unwrap_or(0.0);
        assert!(hit > 0.0 && hit <= 1.0, "score was {hit}");
        assert!(!scores.contains_key("f-2"));
    }

    #[test]
    fn punctuation_in_queries_cannot_break_matching() {
        let store = Storage::open_in_memory().unwrap();
        seed_fact(&store, "f-1", "bearer tokens required by the auth middleware");
        // Raw FTS operators and quotes must be neutralised by tokenization.
        let scores = store
            .keyword_scores(
                engram_core::types::EntityKind::Fact,
                "main",
                "\"bearer\" AND (tokens OR",
            )
            .unwrap();
        assert!(scores.contains_key("f-1"));
    }

    #[test]
    fn empty_query_matches_nothing() {
        let store = Storage::open_in_memory().unwrap();
        seed_fact(&store, "f-1", "anything at all");
        let scores = store
            .keyword_scores(engram_core::types::EntityKind::Fact, "main", "  …  ")
            .unwrap();
        assert!(scores.is_empty());
    }
}
