use std::sync::Arc;

use tracing::{info, warn};

use engram_core::error::Result;
use engram_core::types::EntityKind;
use engram_embed::EmbeddingProvider;
use engram_storage::Storage;

/// Batch-embed rows that were written while the embedding provider was
/// down (`embedding IS NULL`). Returns how many rows were filled in.
///
/// Provider failures here are terminal for the batch — backfill is an
/// explicit maintenance call, not a write path, so the error surfaces.
pub async fn backfill_embeddings(
    storage: &Arc<Storage>,
    embedder: &Arc<dyn EmbeddingProvider>,
    entity: EntityKind,
    branch: &str,
    limit: usize,
) -> Result<usize> {
    let pending = storage.rows_missing_embedding(entity, branch, limit)?;
    if pending.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = pending.iter().map(|(_, t)| t.clone()).collect();
    let vectors = embedder.embed_batch(&texts).await.map_err(|e| {
        warn!(entity = %entity, branch, error = %e, "backfill batch failed");
        engram_core::EngramError::EmbeddingUnavailable(e.to_string())
    })?;

    let mut filled = 0;
    for ((id, _), vector) in pending.iter().zip(vectors.iter()) {
        storage.set_embedding(entity, branch, id, vector)?;
        filled += 1;
    }
    info!(entity = %entity, branch, filled, "embeddings backfilled");
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::types::{now_rfc3339, Fact, FactStatus};
    use engram_embed::MockEmbedding;

    #[tokio::test]
    async fn fills_only_null_embeddings() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbedding::new(8));
        for (id, embedding) in [("f-1", None), ("f-2", Some(vec![1.0f32, 0.0]))] {
            storage
                .insert_fact(&Fact {
                    id: id.to_string(),
                    text: "something worth remembering".to_string(),
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
                    embedding,
                    metadata: serde_json::json!({}),
                    created_at: now_rfc3339(),
                    updated_at: now_rfc3339(),
                    superseded_at: None,
                })
                .unwrap();
        }

        let filled = backfill_embeddings(&storage, &embedder, EntityKind::Fact, "main", 100)
            .await
            .unwrap();
        assert_eq!(filled, 1);
        let again = backfill_embeddings(&storage, &embedder, EntityKind::Fact, "main", 100)
            .await
            .unwrap();
        assert_eq!(again, 0);
    }
}
