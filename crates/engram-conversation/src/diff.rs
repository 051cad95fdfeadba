use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::instrument;

use engram_core::error::Result;
use engram_core::types::{Message, MessageRole};
use engram_core::EngramError;
use engram_storage::vector::cosine;
use engram_storage::Storage;

/// Reasoning similarity below this at some aligned pair marks the
/// divergence point.
const DIVERGENCE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffVerdict {
    Equivalent,
    Similar,
    Divergent,
    Mixed,
}

impl std::fmt::Display for DiffVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equivalent => write!(f, "equivalent"),
            Self::Similar => write!(f, "similar"),
            Self::Divergent => write!(f, "divergent"),
            Self::Mixed => write!(f, "mixed"),
        }
    }
}

/// Layer 1: what the two conversations *did*.
#[derive(Debug, Clone, Serialize)]
pub struct ActionTrace {
    pub tools_a: Vec<String>,
    pub tools_b: Vec<String>,
    /// Jaccard over the distinct tool sets.
    pub tool_overlap: f64,
    /// Bigram Jaccard over the tool orderings — the action match score.
    pub sequence_similarity: f64,
    /// Shared tools whose arguments differed between the runs.
    pub argument_mismatches: Vec<String>,
    pub errors_a: u64,
    pub errors_b: u64,
}

/// Layer 2: how the two conversations *thought*.
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningTrace {
    /// Positional cosine similarity per aligned assistant-message pair.
    pub pair_similarities: Vec<f64>,
    pub overall: f64,
    /// 1-based index of the first aligned pair under the threshold.
    pub divergence_point: Option<usize>,
}

/// Layer 3: what the two conversations *cost and produced*.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OutcomeDiff {
    pub messages_a: u64,
    pub messages_b: u64,
    pub tokens_a: u64,
    pub tokens_b: u64,
    pub errors_a: u64,
    pub errors_b: u64,
    pub message_delta: i64,
    pub token_delta: i64,
    pub error_delta: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticDiff {
    pub conversation_a: String,
    pub conversation_b: String,
    pub action: ActionTrace,
    pub reasoning: ReasoningTrace,
    pub outcome: OutcomeDiff,
    pub verdict: DiffVerdict,
    /// Largest k such that messages 1..k agree on (role, content hash).
    pub shared_prefix_length: usize,
}

/// Three-layer semantic comparison of two conversations. Deterministic
/// given fixed embeddings and message text.
pub struct SemanticDiffEngine {
    storage: Arc<Storage>,
}

impl SemanticDiffEngine {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    #[instrument(skip(self), fields(conv_a, conv_b))]
    pub fn diff(
        &self,
        branch_a: &str,
        conv_a: &str,
        branch_b: &str,
        conv_b: &str,
    ) -> Result<SemanticDiff> {
        self.storage
            .get_conversation(branch_a, conv_a)?
            .ok_or_else(|| EngramError::not_found("conversation", conv_a))?;
        self.storage
            .get_conversation(branch_b, conv_b)?
            .ok_or_else(|| EngramError::not_found("conversation", conv_b))?;
        let messages_a = self.storage.list_messages(branch_a, conv_a)?;
        let messages_b = self.storage.list_messages(branch_b, conv_b)?;

        let action = action_trace(&messages_a, &messages_b);
        let reasoning = reasoning_trace(&messages_a, &messages_b);
        let outcome = outcome_diff(&messages_a, &messages_b, action.errors_a, action.errors_b);

        let verdict = verdict(action.sequence_similarity, reasoning.overall);
        let shared_prefix_length = shared_prefix(&messages_a, &messages_b);

        Ok(SemanticDiff {
            conversation_a: conv_a.to_string(),
            conversation_b: conv_b.to_string(),
            action,
            reasoning,
            outcome,
            verdict,
            shared_prefix_length,
        })
    }
}

fn tool_sequence(messages: &[Message]) -> Vec<(String, serde_json::Value)> {
    let mut out = Vec::new();
    for msg in messages {
        let Some(calls) = msg.tool_calls.as_ref().and_then(|v| v.as_array()) else {
            continue;
        };
        for call in calls {
            if let Some(name) = call["name"].as_str() {
                out.push((
                    name.to_string(),
                    call.get("input").cloned().unwrap_or(serde_json::Value::Null),
                ));
            }
        }
    }
    out
}

fn error_count(messages: &[Message]) -> u64 {
    messages
        .iter()
        .filter(|m| {
            m.role == MessageRole::ToolResult
                && (m.metadata["is_error"] == true || m.content.to_lowercase().contains("error"))
        })
        .count() as u64
}

fn set_jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    inter / union
}

/// Bigram Jaccard of two orderings. Sequences too short to have bigrams
/// compare directly.
fn bigram_similarity(a: &[String], b: &[String]) -> f64 {
    let bigrams = |s: &[String]| -> HashSet<String> {
        s.windows(2).map(|w| format!("{}→{}", w[0], w[1])).collect()
    };
    let ba = bigrams(a);
    let bb = bigrams(b);
    if ba.is_empty() && bb.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }
    set_jaccard(&ba, &bb)
}

fn action_trace(messages_a: &[Message], messages_b: &[Message]) -> ActionTrace {
    let seq_a = tool_sequence(messages_a);
    let seq_b = tool_sequence(messages_b);
    let tools_a: Vec<String> = seq_a.iter().map(|(n, _)| n.clone()).collect();
    let tools_b: Vec<String> = seq_b.iter().map(|(n, _)| n.clone()).collect();

    let set_a: HashSet<String> = tools_a.iter().cloned().collect();
    let set_b: HashSet<String> = tools_b.iter().cloned().collect();
    let tool_overlap = set_jaccard(&set_a, &set_b);
    let sequence_similarity = bigram_similarity(&tools_a, &tools_b);

    // For each shared tool, compare the argument payloads of its first use.
    let mut argument_mismatches = Vec::new();
    for tool in set_a.intersection(&set_b) {
        let arg_a = seq_a.iter().find(|(n, _)| n == tool).map(|(_, v)| v);
        let arg_b = seq_b.iter().find(|(n, _)| n == tool).map(|(_, v)| v);
        if arg_a != arg_b {
            argument_mismatches.push(tool.clone());
        }
    }
    argument_mismatches.sort();

    ActionTrace {
        tools_a,
        tools_b,
        tool_overlap,
        sequence_similarity,
        argument_mismatches,
        errors_a: error_count(messages_a),
        errors_b: error_count(messages_b),
    }
}

fn reasoning_trace(messages_a: &[Message], messages_b: &[Message]) -> ReasoningTrace {
    let assist = |msgs: &[Message]| -> Vec<Message> {
        msgs.iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .cloned()
            .collect()
    };
    let a = assist(messages_a);
    let b = assist(messages_b);

    let mut pair_similarities = Vec::new();
    let mut divergence_point = None;
    for (i, (ma, mb)) in a.iter().zip(b.iter()).enumerate() {
        let sim = if ma.content == mb.content {
            1.0
        } else {
            match (&ma.embedding, &mb.embedding) {
                (Some(ea), Some(eb)) => cosine(ea, eb),
                _ => 0.0,
            }
        };
        if sim < DIVERGENCE_THRESHOLD && divergence_point.is_none() {
            divergence_point = Some(i + 1);
        }
        pair_similarities.push(sim);
    }

    let overall = if pair_similarities.is_empty() {
        1.0
    } else {
        pair_similarities.iter().sum::<f64>() / pair_similarities.len() as f64
    };

    ReasoningTrace {
        pair_similarities,
        overall,
        divergence_point,
    }
}

fn outcome_diff(
    messages_a: &[Message],
    messages_b: &[Message],
    errors_a: u64,
    errors_b: u64,
) -> OutcomeDiff {
    let tokens_a: u64 = messages_a.iter().map(|m| m.token_count as u64).sum();
    let tokens_b: u64 = messages_b.iter().map(|m| m.token_count as u64).sum();
    OutcomeDiff {
        messages_a: messages_a.len() as u64,
        messages_b: messages_b.len() as u64,
        tokens_a,
        tokens_b,
        errors_a,
        errors_b,
        message_delta: messages_b.len() as i64 - messages_a.len() as i64,
        token_delta: tokens_b as i64 - tokens_a as i64,
        error_delta: errors_b as i64 - errors_a as i64,
    }
}

fn verdict(action_match: f64, reasoning_similarity: f64) -> DiffVerdict {
    if action_match > 0.8 && reasoning_similarity > 0.8 {
        DiffVerdict::Equivalent
    } else if action_match < 0.3 {
        DiffVerdict::Divergent
    } else if action_match > 0.5 && reasoning_similarity > 0.5 {
        DiffVerdict::Similar
    } else {
        DiffVerdict::Mixed
    }
}

fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn shared_prefix(messages_a: &[Message], messages_b: &[Message]) -> usize {
    messages_a
        .iter()
        .zip(messages_b.iter())
        .take_while(|(a, b)| a.role == b.role && content_hash(&a.content) == content_hash(&b.content))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::types::{new_id, now_rfc3339, Conversation, ConversationStatus};

    fn insert_conversation(storage: &Storage, id: &str) {
        storage
            .insert_conversation(&Conversation {
                id: id.to_string(),
                session_id: "s-1".to_string(),
                agent_id: None,
                task_id: None,
                branch: "main".to_string(),
                title: None,
                status: ConversationStatus::Active,
                model: None,
                message_count: 0,
                total_tokens: 0,
                parent_conversation_id: None,
                fork_point_message_id: None,
                metadata: serde_json::json!({}),
                created_at: now_rfc3339(),
            })
            .unwrap();
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_message(
        storage: &Storage,
        conv: &str,
        seq: u32,
        role: MessageRole,
        content: &str,
        tool_calls: Option<serde_json::Value>,
        embedding: Option<Vec<f32>>,
    ) {
        storage
            .insert_message(&Message {
                id: new_id(),
                conversation_id: conv.to_string(),
                role,
                content: content.to_string(),
                thinking: None,
                tool_calls,
                model: None,
                sequence_num: seq,
                token_count: 4,
                session_id: None,
                agent_id: None,
                branch: "main".to_string(),
                embedding,
                metadata: serde_json::json!({}),
                created_at: now_rfc3339(),
            })
            .unwrap();
    }

    #[test]
    fn identical_conversations_are_equivalent() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        insert_conversation(&storage, "c-a");
        insert_conversation(&storage, "c-b");
        for conv in ["c-a", "c-b"] {
            insert_message(&storage, conv, 1, MessageRole::User, "run the tests", None, None);
            insert_message(
                &storage,
                conv,
                2,
                MessageRole::Assistant,
                "running tests now",
                Some(serde_json::json!([{"name": "bash", "input": {"cmd": "cargo test"}}])),
                Some(vec![1.0, 0.0]),
            );
            insert_message(&storage, conv, 3, MessageRole::ToolResult, "all passed", None, None);
        }

        let engine = SemanticDiffEngine::new(storage);
        let diff = engine.diff("main", "c-a", "main", "c-b").unwrap();
        assert_eq!(diff.verdict, DiffVerdict::Equivalent);
        assert_eq!(diff.shared_prefix_length, 3);
        assert!(diff.reasoning.divergence_point.is_none());
        assert_eq!(diff.outcome.message_delta, 0);
    }

    #[test]
    fn different_tool_orderings_are_divergent() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        insert_conversation(&storage, "c-a");
        insert_conversation(&storage, "c-b");
        insert_message(
            &storage,
            "c-a",
            1,
            MessageRole::Assistant,
            "first read then write",
            Some(serde_json::json!([
                {"name": "read_file", "input": {"path": "a"}},
                {"name": "write_file", "input": {"path": "a"}},
            ])),
            Some(vec![1.0, 0.0]),
        );
        insert_message(
            &storage,
            "c-b",
            1,
            MessageRole::Assistant,
            "searching the web instead",
            Some(serde_json::json!([
                {"name": "web_search", "input": {"q": "docs"}},
                {"name": "fetch_url", "input": {"url": "https://example.com"}},
            ])),
            Some(vec![0.0, 1.0]),
        );

        let engine = SemanticDiffEngine::new(storage);
        let diff = engine.diff("main", "c-a", "main", "c-b").unwrap();
        assert_eq!(diff.verdict, DiffVerdict::Divergent);
        assert_eq!(diff.action.tool_overlap, 0.0);
        assert_eq!(diff.reasoning.divergence_point, Some(1));
        assert_eq!(diff.shared_prefix_length, 0);
    }

    #[test]
    fn shared_prefix_stops_at_first_difference() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        insert_conversation(&storage, "c-a");
        insert_conversation(&storage, "c-b");
        for conv in ["c-a", "c-b"] {
            insert_message(&storage, conv, 1, MessageRole::User, "same opener", None, None);
        }
        insert_message(&storage, "c-a", 2, MessageRole::Assistant, "path one", None, None);
        insert_message(&storage, "c-b", 2, MessageRole::Assistant, "path two", None, None);

        let engine = SemanticDiffEngine::new(storage);
        let diff = engine.diff("main", "c-a", "main", "c-b").unwrap();
        assert_eq!(diff.shared_prefix_length, 1);
    }
}
