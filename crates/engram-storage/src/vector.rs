use std::collections::HashMap;

use engram_core::error::Result;
use engram_core::types::EntityKind;

use crate::naming::table_for;
use crate::store::Storage;

/// Cosine similarity in [-1, 1]. Dimension mismatch or a zero-norm side
/// scores 0 — a row without a usable vector contributes nothing.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        na += (*x as f64) * (*x as f64);
        nb += (*y as f64) * (*y as f64);
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Embeddings are stored as JSON arrays in a TEXT column so branch tables
/// stay diffable. Unparseable text reads as no embedding.
pub fn parse_embedding(raw: Option<String>) -> Option<Vec<f32>> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

pub fn embedding_to_json(embedding: &Option<Vec<f32>>) -> Option<String> {
    embedding
        .as_ref()
        .map(|v| serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string()))
}

impl Storage {
    /// VECTOR-COSINE: similarity of every embedded row against a query
    /// vector. Rows with no embedding are absent from the map (score 0 by
    /// contract).
    pub fn vector_scores(
        &self,
        entity: EntityKind,
        branch: &str,
        query_vec: &[f32],
    ) -> Result<HashMap<String, f64>> {
        let table = table_for(entity, branch);
        let conn = self.main.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, embedding FROM {table} WHERE embedding IS NOT NULL"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut out = HashMap::new();
        for r in rows {
            let (id, raw) = r?;
            if let Some(vec) = parse_embedding(raw) {
                out.insert(id, cosine(query_vec, &vec));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![0.5f32, 0.5, 0.0];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_mismatched_dims_is_zero() {
        assert_eq!(cosine(&[1.0, 0.0], &[1.0]), 0.0);
    }

    #[test]
    fn embedding_round_trip() {
        let e = Some(vec![0.25f32, -0.5]);
        let json = embedding_to_json(&e).unwrap();
        assert_eq!(parse_embedding(Some(json)), e);
        assert_eq!(parse_embedding(Some("not json".into())), None);
    }
}
