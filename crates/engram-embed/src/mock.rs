use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::provider::{EmbedError, EmbeddingProvider};

/// Deterministic in-process embedder for tests and offline use.
///
/// Each word token is hashed into the vector so texts sharing words land
/// near each other in cosine space, and identical texts always produce
/// identical vectors. Never fails.
pub struct MockEmbedding {
    dimension: usize,
}

impl MockEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(4),
        }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = (digest[0] as usize) % self.dimension;
            let sign = if digest[1] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        // Normalize so cosine comparisons are scale-free.
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.vector_for(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            0.0
        } else {
            dot / (na * nb)
        }
    }

    #[tokio::test]
    async fn deterministic_and_normalized() {
        let provider = MockEmbedding::new(16);
        let a = provider.embed("bearer tokens in auth middleware").await.unwrap();
        let b = provider.embed("bearer tokens in auth middleware").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated() {
        let provider = MockEmbedding::new(16);
        let a = provider.embed("auth middleware skips bearer tokens").await.unwrap();
        let b = provider.embed("bearer tokens skipped by auth middleware").await.unwrap();
        let c = provider.embed("quarterly revenue spreadsheet totals").await.unwrap();
        assert!(cosine(&a, &b) > cosine(&a, &c));
    }

    #[tokio::test]
    async fn batch_matches_single() {
        let provider = MockEmbedding::new(8);
        let single = provider.embed("one").await.unwrap();
        let batch = provider
            .embed_batch(&["one".to_string(), "two".to_string()])
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], single);
    }
}
