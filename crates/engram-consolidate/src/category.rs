use engram_core::types::{Observation, ObservationType};

/// Infer a fact category from an observation's summary.
///
/// Keyword rules win; otherwise the observation type picks the default.
pub fn infer_category(obs: &Observation) -> String {
    let summary = obs.summary.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| summary.contains(w));

    if has(&["bug", "error", "fix", "crash", "broken"]) {
        return "bug_fix".to_string();
    }
    if has(&["architect", "design", "structure", "layer"]) {
        return "architecture".to_string();
    }
    if has(&["security", "auth", "vulnerab", "credential"]) {
        return "security".to_string();
    }
    if has(&["slow", "latency", "performance", "optimi"]) {
        return "performance".to_string();
    }

    match obs.obs_type {
        ObservationType::Decision => "decision".to_string(),
        ObservationType::Discovery => "discovery".to_string(),
        ObservationType::Insight => "insight".to_string(),
        ObservationType::Error => "bug_fix".to_string(),
        ObservationType::ToolUse => "general".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::types::{now_rfc3339, Outcome};

    fn obs(summary: &str, obs_type: ObservationType) -> Observation {
        Observation {
            id: "o-1".to_string(),
            session_id: "s-1".to_string(),
            obs_type,
            tool_name: None,
            summary: summary.to_string(),
            raw_input: None,
            raw_output: None,
            outcome: Outcome::Success,
            branch: "main".to_string(),
            task_id: None,
            agent_id: None,
            embedding: None,
            created_at: now_rfc3339(),
        }
    }

    #[test]
    fn keyword_rules_take_precedence() {
        assert_eq!(
            infer_category(&obs("fixed the pagination bug", ObservationType::Insight)),
            "bug_fix"
        );
        assert_eq!(
            infer_category(&obs("auth tokens rotate hourly", ObservationType::Discovery)),
            "security"
        );
        assert_eq!(
            infer_category(&obs("layered cache design works", ObservationType::Insight)),
            "architecture"
        );
    }

    #[test]
    fn observation_type_is_the_fallback() {
        assert_eq!(
            infer_category(&obs("we will ship weekly", ObservationType::Decision)),
            "decision"
        );
        assert_eq!(
            infer_category(&obs("the endpoint exists", ObservationType::Discovery)),
            "discovery"
        );
    }
}
