use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{EmbedError, EmbeddingProvider};

/// OpenAI embeddings endpoint (`/v1/embeddings`).
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    /// Path appended to base_url. Default: "/v1/embeddings".
    embed_path: String,
    model: String,
    dimension: usize,
    provider_name: String,
}

impl OpenAiEmbedding {
    pub fn new(api_key: String, base_url: Option<String>, dimension: usize) -> Self {
        Self::with_endpoint(
            "openai",
            api_key,
            base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            "/v1/embeddings".to_string(),
            "text-embedding-3-small".to_string(),
            dimension,
        )
    }

    /// Named OpenAI-compatible embedding provider with a custom endpoint.
    /// `base_url` should NOT include a trailing slash; `embed_path` should
    /// start with "/".
    pub fn with_endpoint(
        name: impl Into<String>,
        api_key: String,
        base_url: String,
        embed_path: String,
        model: String,
        dimension: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider_name: name.into(),
            api_key,
            base_url,
            embed_path,
            model,
            dimension,
        }
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let url = format!("{}{}", self.base_url, self.embed_path);
        debug!(model = %self.model, count = inputs.len(), "requesting embeddings");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&serde_json::json!({
                "model": self.model,
                "input": inputs,
                "dimensions": self.dimension,
            }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(EmbedError::RateLimited {
                retry_after_ms: retry,
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "embedding API error");
            return Err(EmbedError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::Parse(e.to_string()))?;

        let mut data = api_resp.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vecs = self.request(&[text.to_string()]).await?;
        vecs.pop()
            .ok_or_else(|| EmbedError::Parse("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}
