use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use engram_core::error::Result;
use engram_core::types::{
    new_id, now_rfc3339, Bundle, Conversation, Fact, FactStatus, Message, Relation,
    VerificationStatus,
};
use engram_core::EngramError;
use engram_storage::Storage;

/// The serialized shape inside a bundle's payload column.
#[derive(Debug, Serialize, Deserialize)]
pub struct BundlePayload {
    pub source_branch: String,
    pub facts: Vec<Fact>,
    pub relations: Vec<Relation>,
    pub conversations: Vec<Conversation>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ImportCounts {
    pub facts: u64,
    pub relations: u64,
    pub conversations: u64,
    pub messages: u64,
}

pub struct BundleEngine {
    storage: Arc<Storage>,
}

impl BundleEngine {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Serialize a branch's knowledge into one immutable bundle row.
    /// `verified_only` keeps only facts whose metadata says verified.
    #[instrument(skip(self), fields(branch, verified_only))]
    pub fn create(&self, name: &str, branch: &str, verified_only: bool) -> Result<Bundle> {
        self.storage
            .get_branch(branch)?
            .ok_or_else(|| EngramError::not_found("branch", branch))?;

        let mut facts = self.storage.list_facts(branch, Some(FactStatus::Active), None)?;
        if verified_only {
            facts.retain(|f| {
                f.metadata["verification_status"].as_str()
                    == Some(&VerificationStatus::Verified.to_string())
            });
        }
        let relations = self.storage.list_relations(branch, None)?;
        let conversations = self.storage.list_conversations(branch, None)?;
        let mut messages = Vec::new();
        for conv in &conversations {
            messages.extend(self.storage.list_messages(branch, &conv.id)?);
        }

        let payload = BundlePayload {
            source_branch: branch.to_string(),
            facts,
            relations,
            conversations,
            messages,
        };
        let bundle = Bundle {
            id: new_id(),
            name: name.to_string(),
            payload: serde_json::to_string(&payload)?,
            verified_only,
            created_at: now_rfc3339(),
        };
        self.storage.insert_bundle(&bundle)?;
        info!(id = %bundle.id, facts = payload.facts.len(), "bundle created");
        Ok(bundle)
    }

    pub fn get(&self, id: &str) -> Result<Bundle> {
        self.storage
            .get_bundle(id)?
            .ok_or_else(|| EngramError::not_found("bundle", id))
    }

    /// Write a bundle's contents into a branch with fresh ids and
    /// provenance metadata. Conversation foreign keys are remapped.
    #[instrument(skip(self), fields(bundle_id, target_branch))]
    pub fn import(&self, bundle_id: &str, target_branch: &str) -> Result<ImportCounts> {
        let bundle = self.get(bundle_id)?;
        self.storage
            .get_branch(target_branch)?
            .ok_or_else(|| EngramError::not_found("target branch", target_branch))?;
        let payload: BundlePayload = serde_json::from_str(&bundle.payload)?;
        let mut counts = ImportCounts::default();

        for fact in payload.facts {
            let mut metadata = fact.metadata.clone();
            metadata["imported_from_bundle"] = serde_json::Value::from(bundle.id.clone());
            self.storage.insert_fact(&Fact {
                id: new_id(),
                branch: target_branch.to_string(),
                metadata,
                ..fact
            })?;
            counts.facts += 1;
        }
        for relation in payload.relations {
            self.storage.insert_relation(&Relation {
                id: new_id(),
                branch: target_branch.to_string(),
                ..relation
            })?;
            counts.relations += 1;
        }

        let mut conversation_map: HashMap<String, String> = HashMap::new();
        for conversation in payload.conversations {
            let fresh = new_id();
            conversation_map.insert(conversation.id.clone(), fresh.clone());
            let mut metadata = conversation.metadata.clone();
            metadata["imported_from_bundle"] = serde_json::Value::from(bundle.id.clone());
            self.storage.insert_conversation(&Conversation {
                id: fresh,
                branch: target_branch.to_string(),
                metadata,
                ..conversation
            })?;
            counts.conversations += 1;
        }
        for message in payload.messages {
            let Some(conversation_id) = conversation_map.get(&message.conversation_id).cloned()
            else {
                continue;
            };
            self.storage.insert_message(&Message {
                id: new_id(),
                conversation_id,
                branch: target_branch.to_string(),
                ..message
            })?;
            counts.messages += 1;
        }

        info!(facts = counts.facts, "bundle imported");
        Ok(counts)
    }
}
