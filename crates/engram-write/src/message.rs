use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument};

use engram_core::error::Result;
use engram_core::types::{
    new_id, now_rfc3339, Conversation, ConversationStatus, Message, MessageRole,
};
use engram_core::EngramError;
use engram_embed::EmbeddingProvider;
use engram_storage::Storage;

use crate::pipeline::embed_best_effort;

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub thinking: Option<String>,
    pub tool_calls: Option<serde_json::Value>,
    pub model: Option<String>,
    #[serde(default)]
    pub token_count: u32,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub branch: String,
}

/// Write engine for conversations and their messages.
pub struct MessageEngine {
    storage: Arc<Storage>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl MessageEngine {
    pub fn new(storage: Arc<Storage>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { storage, embedder }
    }

    /// Create the conversation record for a freshly started session.
    #[instrument(skip(self), fields(branch, session_id))]
    pub fn open_conversation(
        &self,
        branch: &str,
        session_id: &str,
        title: Option<String>,
        model: Option<String>,
        agent_id: Option<String>,
        task_id: Option<String>,
    ) -> Result<Conversation> {
        let conv = Conversation {
            id: new_id(),
            session_id: session_id.to_string(),
            agent_id,
            task_id,
            branch: branch.to_string(),
            title,
            status: ConversationStatus::Active,
            model,
            message_count: 0,
            total_tokens: 0,
            parent_conversation_id: None,
            fork_point_message_id: None,
            metadata: serde_json::json!({}),
            created_at: now_rfc3339(),
        };
        self.storage.insert_conversation(&conv)?;
        debug!(id = %conv.id, "conversation opened");
        Ok(conv)
    }

    pub fn close_conversation(&self, branch: &str, id: &str) -> Result<()> {
        if self.storage.get_conversation(branch, id)?.is_none() {
            return Err(EngramError::not_found("conversation", id));
        }
        self.storage
            .update_conversation_status(branch, id, ConversationStatus::Completed)
    }

    /// Append a message: next sequence number, embed best-effort, persist,
    /// bump conversation counters.
    #[instrument(skip(self, input), fields(branch = %input.branch, conversation = %input.conversation_id))]
    pub async fn append(&self, input: NewMessage) -> Result<Message> {
        if input.content.is_empty() {
            return Err(EngramError::invalid("content", "must not be empty"));
        }
        if self
            .storage
            .get_conversation(&input.branch, &input.conversation_id)?
            .is_none()
        {
            return Err(EngramError::not_found(
                "conversation",
                &input.conversation_id,
            ));
        }

        let embedding = embed_best_effort(self.embedder.as_ref(), &input.content).await;
        let seq = self
            .storage
            .max_sequence(&input.branch, &input.conversation_id)?
            + 1;
        let msg = Message {
            id: new_id(),
            conversation_id: input.conversation_id,
            role: input.role,
            content: input.content,
            thinking: input.thinking,
            tool_calls: input.tool_calls,
            model: input.model,
            sequence_num: seq,
            token_count: input.token_count,
            session_id: input.session_id,
            agent_id: input.agent_id,
            branch: input.branch,
            embedding,
            metadata: serde_json::json!({}),
            created_at: now_rfc3339(),
        };
        self.storage.insert_message(&msg)?;
        self.storage
            .bump_conversation_stats(&msg.branch, &msg.conversation_id, msg.token_count)?;
        debug!(id = %msg.id, seq, "message appended");
        Ok(msg)
    }

    pub fn list(&self, branch: &str, conversation_id: &str) -> Result<Vec<Message>> {
        self.storage.list_messages(branch, conversation_id)
    }
}
