use async_trait::async_trait;

use crate::openai::OpenAiEmbedding;
use crate::provider::{EmbedError, EmbeddingProvider};

/// Doubao (Volcano Ark) — OpenAI-compatible embeddings API with its own
/// endpoint and default model.
pub struct DoubaoEmbedding {
    inner: OpenAiEmbedding,
}

impl DoubaoEmbedding {
    pub fn new(api_key: String, base_url: Option<String>, dimension: usize) -> Self {
        Self {
            inner: OpenAiEmbedding::with_endpoint(
                "doubao",
                api_key,
                base_url.unwrap_or_else(|| "https://ark.cn-beijing.volces.com".to_string()),
                "/api/v3/embeddings".to_string(),
                "doubao-embedding-text-240715".to_string(),
                dimension,
            ),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for DoubaoEmbedding {
    fn name(&self) -> &str {
        "doubao"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.inner.embed_batch(texts).await
    }
}
