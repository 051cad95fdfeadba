use rusqlite::Row;

use engram_core::error::Result;
use engram_core::types::*;

use crate::naming::table_for;
use crate::store::Storage;
use crate::vector::{embedding_to_json, parse_embedding};

fn json_or_empty(raw: Option<String>) -> serde_json::Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_else(|| serde_json::json!({}))
}

fn row_to_fact(row: &Row<'_>) -> rusqlite::Result<Fact> {
    let status: String = row.get(4)?;
    Ok(Fact {
        id: row.get(0)?,
        text: row.get(1)?,
        category: row.get(2)?,
        confidence: row.get(3)?,
        status: status.parse().unwrap_or(FactStatus::Active),
        parent_id: row.get(5)?,
        source_type: row.get(6)?,
        source_id: row.get(7)?,
        session_id: row.get(8)?,
        task_id: row.get(9)?,
        agent_id: row.get(10)?,
        branch: row.get(11)?,
        embedding: parse_embedding(row.get(12)?),
        metadata: json_or_empty(row.get(13)?),
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
        superseded_at: row.get(16)?,
    })
}

const FACT_COLS: &str = "id, text, category, confidence, status, parent_id, source_type, \
                         source_id, session_id, task_id, agent_id, branch, embedding, \
                         metadata, created_at, updated_at, superseded_at";

fn row_to_observation(row: &Row<'_>) -> rusqlite::Result<Observation> {
    let obs_type: String = row.get(2)?;
    let outcome: String = row.get(7)?;
    Ok(Observation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        obs_type: obs_type.parse().unwrap_or(ObservationType::Insight),
        tool_name: row.get(3)?,
        summary: row.get(4)?,
        raw_input: row.get(5)?,
        raw_output: row.get(6)?,
        outcome: outcome.parse().unwrap_or(Outcome::Success),
        branch: row.get(8)?,
        task_id: row.get(9)?,
        agent_id: row.get(10)?,
        embedding: parse_embedding(row.get(11)?),
        created_at: row.get(12)?,
    })
}

const OBS_COLS: &str = "id, session_id, obs_type, tool_name, summary, raw_input, raw_output, \
                        outcome, branch, task_id, agent_id, embedding, created_at";

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let status: String = row.get(6)?;
    Ok(Conversation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        agent_id: row.get(2)?,
        task_id: row.get(3)?,
        branch: row.get(4)?,
        title: row.get(5)?,
        status: status.parse().unwrap_or(ConversationStatus::Active),
        model: row.get(7)?,
        message_count: row.get::<_, i64>(8)? as u32,
        total_tokens: row.get::<_, i64>(9)? as u64,
        parent_conversation_id: row.get(10)?,
        fork_point_message_id: row.get(11)?,
        metadata: json_or_empty(row.get(12)?),
        created_at: row.get(13)?,
    })
}

const CONV_COLS: &str = "id, session_id, agent_id, task_id, branch, title, status, model, \
                         message_count, total_tokens, parent_conversation_id, \
                         fork_point_message_id, metadata, created_at";

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let tool_calls: Option<String> = row.get(5)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: role.parse().unwrap_or(MessageRole::User),
        content: row.get(3)?,
        thinking: row.get(4)?,
        tool_calls: tool_calls.and_then(|s| serde_json::from_str(&s).ok()),
        model: row.get(6)?,
        sequence_num: row.get::<_, i64>(7)? as u32,
        token_count: row.get::<_, i64>(8)? as u32,
        session_id: row.get(9)?,
        agent_id: row.get(10)?,
        branch: row.get(11)?,
        embedding: parse_embedding(row.get(12)?),
        metadata: json_or_empty(row.get(13)?),
        created_at: row.get(14)?,
    })
}

const MSG_COLS: &str = "id, conversation_id, role, content, thinking, tool_calls, model, \
                        sequence_num, token_count, session_id, agent_id, branch, embedding, \
                        metadata, created_at";

fn row_to_relation(row: &Row<'_>) -> rusqlite::Result<Relation> {
    Ok(Relation {
        id: row.get(0)?,
        source_entity: row.get(1)?,
        target_entity: row.get(2)?,
        relation_type: row.get(3)?,
        properties: json_or_empty(row.get(4)?),
        confidence: row.get(5)?,
        branch: row.get(6)?,
        valid_from: row.get(7)?,
        valid_to: row.get(8)?,
        created_at: row.get(9)?,
    })
}

const REL_COLS: &str = "id, source_entity, target_entity, relation_type, properties, \
                        confidence, branch, valid_from, valid_to, created_at";

impl Storage {
    // ── Facts ──────────────────────────────────────────────────────────

    /// Insert a fact and sync the FTS index, in one transaction.
    pub fn insert_fact(&self, fact: &Fact) -> Result<()> {
        let table = table_for(EntityKind::Fact, &fact.branch);
        let mut conn = self.main.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO {table} ({FACT_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            rusqlite::params![
                fact.id,
                fact.text,
                fact.category,
                fact.confidence,
                fact.status.to_string(),
                fact.parent_id,
                fact.source_type,
                fact.source_id,
                fact.session_id,
                fact.task_id,
                fact.agent_id,
                fact.branch,
                embedding_to_json(&fact.embedding),
                fact.metadata.to_string(),
                fact.created_at,
                fact.updated_at,
                fact.superseded_at,
            ],
        )?;
        self.fts_sync_insert(&tx, EntityKind::Fact, &table, &fact.id)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_fact(&self, branch: &str, id: &str) -> Result<Option<Fact>> {
        let table = table_for(EntityKind::Fact, branch);
        let conn = self.main.lock().unwrap();
        match conn.query_row(
            &format!("SELECT {FACT_COLS} FROM {table} WHERE id = ?1"),
            rusqlite::params![id],
            row_to_fact,
        ) {
            Ok(f) => Ok(Some(f)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All facts on a branch, optionally filtered by status and category.
    pub fn list_facts(
        &self,
        branch: &str,
        status: Option<FactStatus>,
        category: Option<&str>,
    ) -> Result<Vec<Fact>> {
        let table = table_for(EntityKind::Fact, branch);
        let mut sql = format!("SELECT {FACT_COLS} FROM {table} WHERE 1=1");
        if status.is_some() {
            sql.push_str(" AND status = ?1");
        }
        if category.is_some() {
            sql.push_str(if status.is_some() { " AND category = ?2" } else { " AND category = ?1" });
        }
        sql.push_str(" ORDER BY created_at DESC, id");

        let conn = self.main.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let mut params: Vec<String> = Vec::new();
        if let Some(s) = status {
            params.push(s.to_string());
        }
        if let Some(c) = category {
            params.push(c.to_string());
        }
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), row_to_fact)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// AS-OF read: the facts visible at timestamp `t`. A row is visible if
    /// it existed by then and had not yet been superseded.
    pub fn list_facts_as_of(&self, branch: &str, t: &str) -> Result<Vec<Fact>> {
        let table = table_for(EntityKind::Fact, branch);
        let conn = self.main.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FACT_COLS} FROM {table}
             WHERE created_at <= ?1
               AND (superseded_at IS NULL OR superseded_at > ?1)
             ORDER BY created_at DESC, id"
        ))?;
        let rows = stmt.query_map(rusqlite::params![t], row_to_fact)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn update_fact_confidence(&self, branch: &str, id: &str, confidence: f64) -> Result<()> {
        let table = table_for(EntityKind::Fact, branch);
        let conn = self.main.lock().unwrap();
        conn.execute(
            &format!("UPDATE {table} SET confidence = ?1, updated_at = ?2 WHERE id = ?3"),
            rusqlite::params![confidence.clamp(0.0, 1.0), now_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Mark a fact superseded (or archived). The superseded timestamp
    /// drives point-in-time reads.
    pub fn update_fact_status(&self, branch: &str, id: &str, status: FactStatus) -> Result<()> {
        let table = table_for(EntityKind::Fact, branch);
        let now = now_rfc3339();
        let superseded_at = matches!(status, FactStatus::Superseded).then(|| now.clone());
        let conn = self.main.lock().unwrap();
        conn.execute(
            &format!(
                "UPDATE {table}
                 SET status = ?1, updated_at = ?2,
                     superseded_at = COALESCE(?3, superseded_at)
                 WHERE id = ?4"
            ),
            rusqlite::params![status.to_string(), now, superseded_at, id],
        )?;
        Ok(())
    }

    pub fn update_fact_metadata(
        &self,
        branch: &str,
        id: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let table = table_for(EntityKind::Fact, branch);
        let conn = self.main.lock().unwrap();
        conn.execute(
            &format!("UPDATE {table} SET metadata = ?1, updated_at = ?2 WHERE id = ?3"),
            rusqlite::params![metadata.to_string(), now_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Supersede `old_id` with a new version, atomically: the replacement
    /// row is inserted and the old row flipped to `superseded` in one
    /// transaction, so exactly one of the two is active afterwards.
    pub fn supersede_fact(&self, old_id: &str, new_fact: &Fact) -> Result<()> {
        let table = table_for(EntityKind::Fact, &new_fact.branch);
        let now = now_rfc3339();
        let mut conn = self.main.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO {table} ({FACT_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            rusqlite::params![
                new_fact.id,
                new_fact.text,
                new_fact.category,
                new_fact.confidence,
                new_fact.status.to_string(),
                new_fact.parent_id,
                new_fact.source_type,
                new_fact.source_id,
                new_fact.session_id,
                new_fact.task_id,
                new_fact.agent_id,
                new_fact.branch,
                embedding_to_json(&new_fact.embedding),
                new_fact.metadata.to_string(),
                new_fact.created_at,
                new_fact.updated_at,
                new_fact.superseded_at,
            ],
        )?;
        tx.execute(
            &format!(
                "UPDATE {table}
                 SET status = 'superseded', superseded_at = ?1, updated_at = ?1
                 WHERE id = ?2"
            ),
            rusqlite::params![now, old_id],
        )?;
        self.fts_sync_insert(&tx, EntityKind::Fact, &table, &new_fact.id)?;
        tx.commit()?;
        Ok(())
    }

    // ── Observations ───────────────────────────────────────────────────

    pub fn insert_observation(&self, obs: &Observation) -> Result<()> {
        let table = table_for(EntityKind::Observation, &obs.branch);
        let mut conn = self.main.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO {table} ({OBS_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            rusqlite::params![
                obs.id,
                obs.session_id,
                obs.obs_type.to_string(),
                obs.tool_name,
                obs.summary,
                obs.raw_input,
                obs.raw_output,
                obs.outcome.to_string(),
                obs.branch,
                obs.task_id,
                obs.agent_id,
                embedding_to_json(&obs.embedding),
                obs.created_at,
            ],
        )?;
        self.fts_sync_insert(&tx, EntityKind::Observation, &table, &obs.id)?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_observations(
        &self,
        branch: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<Observation>> {
        let table = table_for(EntityKind::Observation, branch);
        let conn = self.main.lock().unwrap();
        let mut out = Vec::new();
        if let Some(sid) = session_id {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBS_COLS} FROM {table} WHERE session_id = ?1 ORDER BY created_at, id"
            ))?;
            let rows = stmt.query_map(rusqlite::params![sid], row_to_observation)?;
            for r in rows {
                out.push(r?);
            }
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBS_COLS} FROM {table} ORDER BY created_at, id"
            ))?;
            let rows = stmt.query_map([], row_to_observation)?;
            for r in rows {
                out.push(r?);
            }
        }
        Ok(out)
    }

    pub fn get_observation(&self, branch: &str, id: &str) -> Result<Option<Observation>> {
        let table = table_for(EntityKind::Observation, branch);
        let conn = self.main.lock().unwrap();
        match conn.query_row(
            &format!("SELECT {OBS_COLS} FROM {table} WHERE id = ?1"),
            rusqlite::params![id],
            row_to_observation,
        ) {
            Ok(o) => Ok(Some(o)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ── Conversations ──────────────────────────────────────────────────

    pub fn insert_conversation(&self, conv: &Conversation) -> Result<()> {
        let table = table_for(EntityKind::Conversation, &conv.branch);
        let conn = self.main.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {table} ({CONV_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            rusqlite::params![
                conv.id,
                conv.session_id,
                conv.agent_id,
                conv.task_id,
                conv.branch,
                conv.title,
                conv.status.to_string(),
                conv.model,
                conv.message_count as i64,
                conv.total_tokens as i64,
                conv.parent_conversation_id,
                conv.fork_point_message_id,
                conv.metadata.to_string(),
                conv.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_conversation(&self, branch: &str, id: &str) -> Result<Option<Conversation>> {
        let table = table_for(EntityKind::Conversation, branch);
        let conn = self.main.lock().unwrap();
        match conn.query_row(
            &format!("SELECT {CONV_COLS} FROM {table} WHERE id = ?1"),
            rusqlite::params![id],
            row_to_conversation,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_conversations(
        &self,
        branch: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<Conversation>> {
        let table = table_for(EntityKind::Conversation, branch);
        let conn = self.main.lock().unwrap();
        let mut out = Vec::new();
        if let Some(sid) = session_id {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONV_COLS} FROM {table} WHERE session_id = ?1 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(rusqlite::params![sid], row_to_conversation)?;
            for r in rows {
                out.push(r?);
            }
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONV_COLS} FROM {table} ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map([], row_to_conversation)?;
            for r in rows {
                out.push(r?);
            }
        }
        Ok(out)
    }

    pub fn update_conversation_status(
        &self,
        branch: &str,
        id: &str,
        status: ConversationStatus,
    ) -> Result<()> {
        let table = table_for(EntityKind::Conversation, branch);
        let conn = self.main.lock().unwrap();
        conn.execute(
            &format!("UPDATE {table} SET status = ?1 WHERE id = ?2"),
            rusqlite::params![status.to_string(), id],
        )?;
        Ok(())
    }

    pub fn update_conversation_metadata(
        &self,
        branch: &str,
        id: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let table = table_for(EntityKind::Conversation, branch);
        let conn = self.main.lock().unwrap();
        conn.execute(
            &format!("UPDATE {table} SET metadata = ?1 WHERE id = ?2"),
            rusqlite::params![metadata.to_string(), id],
        )?;
        Ok(())
    }

    /// Bump message_count and total_tokens after a message lands.
    pub fn bump_conversation_stats(&self, branch: &str, id: &str, tokens: u32) -> Result<()> {
        let table = table_for(EntityKind::Conversation, branch);
        let conn = self.main.lock().unwrap();
        conn.execute(
            &format!(
                "UPDATE {table}
                 SET message_count = message_count + 1,
                     total_tokens  = total_tokens + ?1
                 WHERE id = ?2"
            ),
            rusqlite::params![tokens as i64, id],
        )?;
        Ok(())
    }

    // ── Messages ───────────────────────────────────────────────────────

    pub fn insert_message(&self, msg: &Message) -> Result<()> {
        let table = table_for(EntityKind::Message, &msg.branch);
        let conn = self.main.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {table} ({MSG_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            rusqlite::params![
                msg.id,
                msg.conversation_id,
                msg.role.to_string(),
                msg.content,
                msg.thinking,
                msg.tool_calls.as_ref().map(|v| v.to_string()),
                msg.model,
                msg.sequence_num as i64,
                msg.token_count as i64,
                msg.session_id,
                msg.agent_id,
                msg.branch,
                embedding_to_json(&msg.embedding),
                msg.metadata.to_string(),
                msg.created_at,
            ],
        )?;
        Ok(())
    }

    /// Messages of one conversation in sequence order.
    pub fn list_messages(&self, branch: &str, conversation_id: &str) -> Result<Vec<Message>> {
        let table = table_for(EntityKind::Message, branch);
        let conn = self.main.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MSG_COLS} FROM {table} WHERE conversation_id = ?1 ORDER BY sequence_num"
        ))?;
        let rows = stmt.query_map(rusqlite::params![conversation_id], row_to_message)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn max_sequence(&self, branch: &str, conversation_id: &str) -> Result<u32> {
        let table = table_for(EntityKind::Message, branch);
        let conn = self.main.lock().unwrap();
        let max: Option<i64> = conn.query_row(
            &format!("SELECT MAX(sequence_num) FROM {table} WHERE conversation_id = ?1"),
            rusqlite::params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0) as u32)
    }

    pub fn get_message(&self, branch: &str, id: &str) -> Result<Option<Message>> {
        let table = table_for(EntityKind::Message, branch);
        let conn = self.main.lock().unwrap();
        match conn.query_row(
            &format!("SELECT {MSG_COLS} FROM {table} WHERE id = ?1"),
            rusqlite::params![id],
            row_to_message,
        ) {
            Ok(m) => Ok(Some(m)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn update_message_metadata(
        &self,
        branch: &str,
        id: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let table = table_for(EntityKind::Message, branch);
        let conn = self.main.lock().unwrap();
        conn.execute(
            &format!("UPDATE {table} SET metadata = ?1 WHERE id = ?2"),
            rusqlite::params![metadata.to_string(), id],
        )?;
        Ok(())
    }

    // ── Relations ──────────────────────────────────────────────────────

    pub fn insert_relation(&self, rel: &Relation) -> Result<()> {
        let table = table_for(EntityKind::Relation, &rel.branch);
        let conn = self.main.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {table} ({REL_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            rusqlite::params![
                rel.id,
                rel.source_entity,
                rel.target_entity,
                rel.relation_type,
                rel.properties.to_string(),
                rel.confidence,
                rel.branch,
                rel.valid_from,
                rel.valid_to,
                rel.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_relation(&self, branch: &str, id: &str) -> Result<Option<Relation>> {
        let table = table_for(EntityKind::Relation, branch);
        let conn = self.main.lock().unwrap();
        match conn.query_row(
            &format!("SELECT {REL_COLS} FROM {table} WHERE id = ?1"),
            rusqlite::params![id],
            row_to_relation,
        ) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_relations(&self, branch: &str, entity: Option<&str>) -> Result<Vec<Relation>> {
        let table = table_for(EntityKind::Relation, branch);
        let conn = self.main.lock().unwrap();
        let mut out = Vec::new();
        if let Some(e) = entity {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REL_COLS} FROM {table}
                 WHERE source_entity = ?1 OR target_entity = ?1
                 ORDER BY created_at"
            ))?;
            let rows = stmt.query_map(rusqlite::params![e], row_to_relation)?;
            for r in rows {
                out.push(r?);
            }
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REL_COLS} FROM {table} ORDER BY created_at"
            ))?;
            let rows = stmt.query_map([], row_to_relation)?;
            for r in rows {
                out.push(r?);
            }
        }
        Ok(out)
    }

    // ── Embedding backfill ─────────────────────────────────────────────

    /// Rows on a branch still lacking an embedding, as (id, text) pairs.
    pub fn rows_missing_embedding(
        &self,
        entity: EntityKind,
        branch: &str,
        limit: usize,
    ) -> Result<Vec<(String, String)>> {
        let col = match entity {
            EntityKind::Fact => "text",
            EntityKind::Observation => "summary",
            EntityKind::Message => "content",
            _ => return Ok(Vec::new()),
        };
        let table = table_for(entity, branch);
        let conn = self.main.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, {col} FROM {table} WHERE embedding IS NULL LIMIT ?1"
        ))?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_embedding(
        &self,
        entity: EntityKind,
        branch: &str,
        id: &str,
        embedding: &[f32],
    ) -> Result<()> {
        let table = table_for(entity, branch);
        let json = serde_json::to_string(embedding)?;
        let conn = self.main.lock().unwrap();
        conn.execute(
            &format!("UPDATE {table} SET embedding = ?1 WHERE id = ?2"),
            rusqlite::params![json, id],
        )?;
        Ok(())
    }
}
