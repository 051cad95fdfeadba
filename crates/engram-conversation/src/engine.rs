use std::sync::Arc;

use tracing::{debug, info, instrument};

use engram_core::error::Result;
use engram_core::types::{
    new_id, now_rfc3339, Conversation, ConversationStatus, Message, Replay, ReplayStatus,
};
use engram_core::EngramError;
use engram_storage::Storage;

pub struct ConversationEngine {
    storage: Arc<Storage>,
}

impl ConversationEngine {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    fn require_conversation(&self, branch: &str, id: &str) -> Result<Conversation> {
        self.storage
            .get_conversation(branch, id)?
            .ok_or_else(|| EngramError::not_found("conversation", id))
    }

    /// Fork a conversation at a message sequence number. The first
    /// `at_seq` messages are copied with fresh ids and their original
    /// sequence numbers; new messages on the fork continue after that.
    #[instrument(skip(self), fields(branch, conversation_id, at_seq))]
    pub fn fork(&self, branch: &str, conversation_id: &str, at_seq: u32) -> Result<Conversation> {
        let source = self.require_conversation(branch, conversation_id)?;
        let messages = self.storage.list_messages(branch, conversation_id)?;
        if at_seq == 0 || at_seq as usize > messages.len() {
            return Err(EngramError::invalid(
                "at_seq",
                format!("{} is outside 1..={}", at_seq, messages.len()),
            ));
        }

        let prefix = &messages[..at_seq as usize];
        let fork_point = prefix.last().expect("non-empty prefix");
        let total_tokens: u64 = prefix.iter().map(|m| m.token_count as u64).sum();

        let fork = Conversation {
            id: new_id(),
            session_id: source.session_id.clone(),
            agent_id: source.agent_id.clone(),
            task_id: source.task_id.clone(),
            branch: branch.to_string(),
            title: source.title.clone(),
            status: ConversationStatus::Active,
            model: source.model.clone(),
            message_count: at_seq,
            total_tokens,
            parent_conversation_id: Some(source.id.clone()),
            fork_point_message_id: Some(fork_point.id.clone()),
            metadata: serde_json::json!({}),
            created_at: now_rfc3339(),
        };
        self.storage.insert_conversation(&fork)?;

        for msg in prefix {
            let copy = Message {
                id: new_id(),
                conversation_id: fork.id.clone(),
                ..msg.clone()
            };
            self.storage.insert_message(&copy)?;
        }
        info!(fork_id = %fork.id, "conversation forked");
        Ok(fork)
    }

    /// Copy a conversation (or a contiguous `[from_seq, to_seq]` range of
    /// it) onto another branch as a new conversation, renumbered from 1.
    /// The source is untouched except for cherry-pick bookkeeping in the
    /// copied messages' source metadata.
    #[instrument(skip(self), fields(branch, conversation_id, target_branch))]
    pub fn cherry_pick(
        &self,
        branch: &str,
        conversation_id: &str,
        target_branch: &str,
        range: Option<(u32, u32)>,
    ) -> Result<Conversation> {
        let source = self.require_conversation(branch, conversation_id)?;
        self.storage
            .get_branch(target_branch)?
            .ok_or_else(|| EngramError::not_found("target branch", target_branch))?;
        if let Some((from, to)) = range {
            if from == 0 || from > to {
                return Err(EngramError::invalid(
                    "range",
                    format!("[{from}, {to}] is not a valid 1-based range"),
                ));
            }
        }

        let messages = self.storage.list_messages(branch, conversation_id)?;
        let selected: Vec<&Message> = match range {
            Some((from, to)) => messages
                .iter()
                .filter(|m| m.sequence_num >= from && m.sequence_num <= to)
                .collect(),
            None => messages.iter().collect(),
        };

        let total_tokens: u64 = selected.iter().map(|m| m.token_count as u64).sum();
        let copy = Conversation {
            id: new_id(),
            session_id: source.session_id.clone(),
            agent_id: source.agent_id.clone(),
            task_id: source.task_id.clone(),
            branch: target_branch.to_string(),
            title: source.title.clone(),
            status: ConversationStatus::Active,
            model: source.model.clone(),
            message_count: selected.len() as u32,
            total_tokens,
            parent_conversation_id: Some(source.id.clone()),
            fork_point_message_id: None,
            metadata: serde_json::json!({ "cherry_picked_from": source.id }),
            created_at: now_rfc3339(),
        };
        self.storage.insert_conversation(&copy)?;

        for (i, msg) in selected.iter().enumerate() {
            let new_msg = Message {
                id: new_id(),
                conversation_id: copy.id.clone(),
                sequence_num: (i + 1) as u32,
                branch: target_branch.to_string(),
                ..(*msg).clone()
            };
            self.storage.insert_message(&new_msg)?;

            // Source bookkeeping: mark the row and append the copy's id to
            // its back-reference list.
            let mut metadata = msg.metadata.clone();
            metadata["is_cherry_picked"] = serde_json::Value::from(true);
            let mut refs = metadata["cherry_pick_refs"].as_array().cloned().unwrap_or_default();
            refs.push(serde_json::Value::from(new_msg.id.clone()));
            metadata["cherry_pick_refs"] = serde_json::Value::from(refs);
            self.storage.update_message_metadata(branch, &msg.id, &metadata)?;
        }
        info!(copy_id = %copy.id, count = selected.len(), "conversation cherry-picked");
        Ok(copy)
    }

    /// Fork at a message and register the replay parameters for an
    /// external executor.
    #[instrument(skip(self, parameters), fields(branch, conversation_id, fork_at))]
    pub fn create_replay(
        &self,
        branch: &str,
        conversation_id: &str,
        fork_at: u32,
        parameters: serde_json::Value,
    ) -> Result<Replay> {
        let fork = self.fork(branch, conversation_id, fork_at)?;
        let replay = Replay {
            id: new_id(),
            conversation_id: fork.id,
            source_conversation_id: conversation_id.to_string(),
            fork_at,
            parameters,
            status: ReplayStatus::Pending,
            final_message_ids: None,
            created_at: now_rfc3339(),
        };
        self.storage.insert_replay(&replay)?;
        debug!(replay_id = %replay.id, "replay registered");
        Ok(replay)
    }

    pub fn get_replay(&self, id: &str) -> Result<Replay> {
        self.storage
            .get_replay(id)?
            .ok_or_else(|| EngramError::not_found("replay", id))
    }

    /// The message prefix an external executor should resume from, in
    /// order.
    pub fn replay_context(&self, branch: &str, replay_id: &str) -> Result<Vec<Message>> {
        let replay = self.get_replay(replay_id)?;
        let messages = self.storage.list_messages(branch, &replay.conversation_id)?;
        Ok(messages
            .into_iter()
            .filter(|m| m.sequence_num <= replay.fork_at)
            .collect())
    }

    /// Mark a replay complete, recording the messages the executor
    /// appended.
    pub fn complete_replay(&self, replay_id: &str, final_message_ids: &[String]) -> Result<()> {
        // Existence check first so the error is NotFound, not a 0-row update.
        self.get_replay(replay_id)?;
        self.storage.complete_replay_row(replay_id, final_message_ids)
    }
}
