use engram_embed::EmbeddingProvider;
use tracing::warn;

/// Best-effort embedding: a provider failure is logged and swallowed so the
/// caller writes `embedding = null` instead of failing the request.
pub async fn embed_best_effort(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> Option<Vec<f32>> {
    match provider.embed(text).await {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(provider = provider.name(), error = %e, "embedding failed, writing null");
            None
        }
    }
}

/// Raw tool payloads are capped so a single verbose tool call cannot bloat
/// the observation table.
pub const RAW_PAYLOAD_MAX_CHARS: usize = 2000;

pub fn truncate_payload(raw: Option<String>) -> Option<String> {
    raw.map(|s| {
        if s.chars().count() <= RAW_PAYLOAD_MAX_CHARS {
            s
        } else {
            s.chars().take(RAW_PAYLOAD_MAX_CHARS).collect()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_payloads_pass_through() {
        assert_eq!(truncate_payload(Some("abc".into())), Some("abc".into()));
        assert_eq!(truncate_payload(None), None);
    }

    #[test]
    fn long_payloads_are_capped() {
        let long = "x".repeat(5000);
        let out = truncate_payload(Some(long)).unwrap();
        assert_eq!(out.chars().count(), RAW_PAYLOAD_MAX_CHARS);
    }
}
