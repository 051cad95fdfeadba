use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// Structured per-dimension scoring by an external LLM.
///
/// Absence of a judge is a legitimate runtime state — consumers fall back
/// to heuristics, so `score` errors are recovered at the engine boundary.
#[async_trait]
pub trait LlmJudge: Send + Sync {
    fn name(&self) -> &str;

    /// Score the prompt along the named dimensions, each in [0, 1].
    async fn score(
        &self,
        prompt: &str,
        dimensions: &[&str],
    ) -> Result<HashMap<String, f64>, JudgeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// OpenAI-compatible chat-completions judge. Asks for a bare JSON object
/// of dimension → score and parses the reply.
pub struct OpenAiJudge {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiJudge {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            model: "gpt-4o-mini".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl LlmJudge for OpenAiJudge {
    fn name(&self) -> &str {
        "openai"
    }

    async fn score(
        &self,
        prompt: &str,
        dimensions: &[&str],
    ) -> Result<HashMap<String, f64>, JudgeError> {
        let dims = dimensions.join(", ");
        let system = format!(
            "You are a strict quality judge. Score the given item on these \
             dimensions: {dims}. Reply with ONLY a JSON object mapping each \
             dimension name to a number between 0 and 1."
        );
        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!(model = %self.model, "sending judge request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": prompt},
                ],
                "temperature": 0,
                "response_format": {"type": "json_object"},
            }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "judge API error");
            return Err(JudgeError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ChatResponse = resp
            .json()
            .await
            .map_err(|e| JudgeError::Parse(e.to_string()))?;
        let content = api_resp
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| JudgeError::Parse("empty judge response".to_string()))?;

        let raw: HashMap<String, f64> = serde_json::from_str(content)
            .map_err(|e| JudgeError::Parse(format!("judge reply is not a score map: {e}")))?;

        let mut scores = HashMap::new();
        for dim in dimensions {
            let value = raw
                .get(*dim)
                .copied()
                .ok_or_else(|| JudgeError::Parse(format!("missing dimension '{dim}'")))?;
            scores.insert(dim.to_string(), value.clamp(0.0, 1.0));
        }
        Ok(scores)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}
