use async_trait::async_trait;

use engram_core::config::{EmbeddingProviderKind, EngramConfig};

/// Common interface for all embedding backends.
///
/// Calls are best-effort from the engines' perspective: a failure is logged
/// and the write proceeds with a null embedding, so implementations should
/// return honest errors rather than degrade silently.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Output vector dimension, fixed per provider.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Default: sequential single embeds. Providers with a batch endpoint
    /// override this.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

/// Build the provider the config names.
pub fn from_config(config: &EngramConfig) -> Box<dyn EmbeddingProvider> {
    match config.embedding_provider {
        EmbeddingProviderKind::OpenAi => Box::new(crate::openai::OpenAiEmbedding::new(
            config.llm_api_key.clone().unwrap_or_default(),
            config.llm_base_url.clone(),
            config.embedding_dimension,
        )),
        EmbeddingProviderKind::Doubao => Box::new(crate::doubao::DoubaoEmbedding::new(
            config.llm_api_key.clone().unwrap_or_default(),
            config.llm_base_url.clone(),
            config.embedding_dimension,
        )),
        EmbeddingProviderKind::Mock => {
            Box::new(crate::mock::MockEmbedding::new(config.embedding_dimension.min(32)))
        }
    }
}
