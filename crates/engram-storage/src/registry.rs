//! CRUD over the branch-independent registry and audit tables.

use rusqlite::Row;

use engram_core::error::Result;
use engram_core::types::*;

use crate::store::Storage;

fn json_or<T: Default + serde::de::DeserializeOwned>(raw: Option<String>) -> T {
    raw.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
}

fn row_to_branch(row: &Row<'_>) -> rusqlite::Result<Branch> {
    let status: String = row.get(2)?;
    let metadata: Option<String> = row.get(4)?;
    Ok(Branch {
        name: row.get(0)?,
        parent: row.get(1)?,
        status: status.parse().unwrap_or(BranchStatus::Active),
        description: row.get(3)?,
        metadata: metadata
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| serde_json::json!({})),
        created_at: row.get(5)?,
    })
}

const BRANCH_COLS: &str = "name, parent, status, description, metadata, created_at";

impl Storage {
    // ── Branch registry ────────────────────────────────────────────────

    pub fn insert_branch(&self, branch: &Branch) -> Result<()> {
        let conn = self.main.lock().unwrap();
        conn.execute(
            &format!("INSERT INTO branches ({BRANCH_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            rusqlite::params![
                branch.name,
                branch.parent,
                branch.status.to_string(),
                branch.description,
                branch.metadata.to_string(),
                branch.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        let conn = self.main.lock().unwrap();
        match conn.query_row(
            &format!("SELECT {BRANCH_COLS} FROM branches WHERE name = ?1"),
            rusqlite::params![name],
            row_to_branch,
        ) {
            Ok(b) => Ok(Some(b)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_branches(&self, statuses: Option<&[BranchStatus]>) -> Result<Vec<Branch>> {
        let conn = self.main.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BRANCH_COLS} FROM branches ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([], row_to_branch)?;
        let mut out = Vec::new();
        for r in rows {
            let b = r?;
            if statuses.map(|s| s.contains(&b.status)).unwrap_or(true) {
                out.push(b);
            }
        }
        Ok(out)
    }

    pub fn update_branch_status(&self, name: &str, status: BranchStatus) -> Result<()> {
        let conn = self.main.lock().unwrap();
        conn.execute(
            "UPDATE branches SET status = ?1 WHERE name = ?2",
            rusqlite::params![status.to_string(), name],
        )?;
        Ok(())
    }

    pub fn delete_branch_entry(&self, name: &str) -> Result<()> {
        let conn = self.main.lock().unwrap();
        conn.execute("DELETE FROM branches WHERE name = ?1", rusqlite::params![name])?;
        Ok(())
    }

    // ── Merge history ──────────────────────────────────────────────────

    pub fn insert_merge_record(&self, rec: &MergeRecord) -> Result<()> {
        let conn = self.main.lock().unwrap();
        conn.execute(
            "INSERT INTO merge_history (id, source, target, strategy, merged, skipped, conflicted, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                rec.id,
                rec.source,
                rec.target,
                rec.strategy.to_string(),
                rec.counts.merged as i64,
                rec.counts.skipped as i64,
                rec.counts.conflicted as i64,
                rec.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn list_merge_records(&self, target: Option<&str>) -> Result<Vec<MergeRecord>> {
        let conn = self.main.lock().unwrap();
        let map = |row: &Row<'_>| -> rusqlite::Result<MergeRecord> {
            let strategy: String = row.get(3)?;
            Ok(MergeRecord {
                id: row.get(0)?,
                source: row.get(1)?,
                target: row.get(2)?,
                strategy: strategy.parse().unwrap_or(MergeStrategy::Native),
                counts: MergeCounts {
                    merged: row.get::<_, i64>(4)? as u64,
                    skipped: row.get::<_, i64>(5)? as u64,
                    conflicted: row.get::<_, i64>(6)? as u64,
                },
                created_at: row.get(7)?,
            })
        };
        let mut out = Vec::new();
        if let Some(t) = target {
            let mut stmt = conn.prepare(
                "SELECT id, source, target, strategy, merged, skipped, conflicted, created_at
                 FROM merge_history WHERE target = ?1 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(rusqlite::params![t], map)?;
            for r in rows {
                out.push(r?);
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, source, target, strategy, merged, skipped, conflicted, created_at
                 FROM merge_history ORDER BY created_at",
            )?;
            let rows = stmt.query_map([], map)?;
            for r in rows {
                out.push(r?);
            }
        }
        Ok(out)
    }

    // ── Consolidation history ──────────────────────────────────────────

    pub fn insert_consolidation_record(&self, rec: &ConsolidationRecord) -> Result<()> {
        let conn = self.main.lock().unwrap();
        conn.execute(
            "INSERT INTO consolidation_history
             (id, level, source_branch, target_branch, created_count, updated_count,
              deduplicated_count, observations_processed, summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                rec.id,
                rec.level.to_string(),
                rec.source_branch,
                rec.target_branch,
                rec.created_count as i64,
                rec.updated_count as i64,
                rec.deduplicated_count as i64,
                rec.observations_processed as i64,
                rec.summary,
                rec.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn list_consolidation_records(&self, branch: Option<&str>) -> Result<Vec<ConsolidationRecord>> {
        let conn = self.main.lock().unwrap();
        let map = |row: &Row<'_>| -> rusqlite::Result<ConsolidationRecord> {
            let level: String = row.get(1)?;
            Ok(ConsolidationRecord {
                id: row.get(0)?,
                level: level.parse().unwrap_or(ConsolidationLevel::Session),
                source_branch: row.get(2)?,
                target_branch: row.get(3)?,
                created_count: row.get::<_, i64>(4)? as u64,
                updated_count: row.get::<_, i64>(5)? as u64,
                deduplicated_count: row.get::<_, i64>(6)? as u64,
                observations_processed: row.get::<_, i64>(7)? as u64,
                summary: row.get(8)?,
                created_at: row.get(9)?,
            })
        };
        let sql = "SELECT id, level, source_branch, target_branch, created_count, updated_count,
                          deduplicated_count, observations_processed, summary, created_at
                   FROM consolidation_history";
        let mut out = Vec::new();
        if let Some(b) = branch {
            let mut stmt = conn.prepare(&format!(
                "{sql} WHERE source_branch = ?1 ORDER BY created_at"
            ))?;
            let rows = stmt.query_map(rusqlite::params![b], map)?;
            for r in rows {
                out.push(r?);
            }
        } else {
            let mut stmt = conn.prepare(&format!("{sql} ORDER BY created_at"))?;
            let rows = stmt.query_map([], map)?;
            for r in rows {
                out.push(r?);
            }
        }
        Ok(out)
    }

    // ── Tasks ──────────────────────────────────────────────────────────

    pub fn insert_task(&self, task: &Task) -> Result<()> {
        let conn = self.main.lock().unwrap();
        conn.execute(
            "INSERT INTO tasks (id, name, description, task_type, objectives, parent_branch, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                task.id,
                task.name,
                task.description,
                task.task_type,
                serde_json::to_string(&task.objectives)?,
                task.parent_branch,
                task.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.main.lock().unwrap();
        match conn.query_row(
            "SELECT id, name, description, task_type, objectives, parent_branch, created_at
             FROM tasks WHERE id = ?1",
            rusqlite::params![id],
            |row| {
                Ok(Task {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    task_type: row.get(3)?,
                    objectives: json_or(row.get(4)?),
                    parent_branch: row.get(5)?,
                    created_at: row.get(6)?,
                })
            },
        ) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn update_task_objectives(&self, id: &str, objectives: &[Objective]) -> Result<()> {
        let conn = self.main.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET objectives = ?1 WHERE id = ?2",
            rusqlite::params![serde_json::to_string(objectives)?, id],
        )?;
        Ok(())
    }

    // ── Sessions ───────────────────────────────────────────────────────

    pub fn insert_session(&self, session: &Session) -> Result<()> {
        let conn = self.main.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions
             (id, parent_session_id, branch, task_id, agent_id, status, summary, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                session.id,
                session.parent_session_id,
                session.branch,
                session.task_id,
                session.agent_id,
                session.status.to_string(),
                session.summary,
                session.started_at,
                session.ended_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.main.lock().unwrap();
        match conn.query_row(
            "SELECT id, parent_session_id, branch, task_id, agent_id, status, summary, started_at, ended_at
             FROM sessions WHERE id = ?1",
            rusqlite::params![id],
            |row| {
                let status: String = row.get(5)?;
                Ok(Session {
                    id: row.get(0)?,
                    parent_session_id: row.get(1)?,
                    branch: row.get(2)?,
                    task_id: row.get(3)?,
                    agent_id: row.get(4)?,
                    status: status.parse().unwrap_or(SessionStatus::Active),
                    summary: row.get(6)?,
                    started_at: row.get(7)?,
                    ended_at: row.get(8)?,
                })
            },
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn end_session(&self, id: &str, summary: Option<&str>) -> Result<()> {
        let conn = self.main.lock().unwrap();
        let changed = conn.execute(
            "UPDATE sessions SET status = 'ended', summary = COALESCE(?1, summary), ended_at = ?2
             WHERE id = ?3",
            rusqlite::params![summary, now_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(engram_core::EngramError::not_found("session", id));
        }
        Ok(())
    }

    // ── Snapshots ──────────────────────────────────────────────────────

    pub fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let conn = self.main.lock().unwrap();
        conn.execute(
            "INSERT INTO snapshots (id, branch, label, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                snapshot.id,
                snapshot.branch,
                snapshot.label,
                snapshot.payload,
                snapshot.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_snapshot(&self, id: &str) -> Result<Option<Snapshot>> {
        let conn = self.main.lock().unwrap();
        match conn.query_row(
            "SELECT id, branch, label, payload, created_at FROM snapshots WHERE id = ?1",
            rusqlite::params![id],
            |row| {
                Ok(Snapshot {
                    id: row.get(0)?,
                    branch: row.get(1)?,
                    label: row.get(2)?,
                    payload: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_snapshots(&self, branch: Option<&str>) -> Result<Vec<Snapshot>> {
        let conn = self.main.lock().unwrap();
        let map = |row: &Row<'_>| -> rusqlite::Result<Snapshot> {
            Ok(Snapshot {
                id: row.get(0)?,
                branch: row.get(1)?,
                label: row.get(2)?,
                payload: row.get(3)?,
                created_at: row.get(4)?,
            })
        };
        let mut out = Vec::new();
        if let Some(b) = branch {
            let mut stmt = conn.prepare(
                "SELECT id, branch, label, payload, created_at FROM snapshots
                 WHERE branch = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(rusqlite::params![b], map)?;
            for r in rows {
                out.push(r?);
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, branch, label, payload, created_at FROM snapshots
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map([], map)?;
            for r in rows {
                out.push(r?);
            }
        }
        Ok(out)
    }

    // ── Scores ─────────────────────────────────────────────────────────

    pub fn insert_score(&self, score: &Score) -> Result<()> {
        let conn = self.main.lock().unwrap();
        conn.execute(
            "INSERT INTO scores
             (id, target_type, target_id, dimension, value, scorer, explanation, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                score.id,
                score.target_type,
                score.target_id,
                score.dimension,
                score.value,
                score.scorer.to_string(),
                score.explanation,
                score.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn list_scores(&self, target_type: &str, target_id: &str) -> Result<Vec<Score>> {
        let conn = self.main.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, target_type, target_id, dimension, value, scorer, explanation, created_at
             FROM scores WHERE target_type = ?1 AND target_id = ?2 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![target_type, target_id], |row| {
            let scorer: String = row.get(5)?;
            Ok(Score {
                id: row.get(0)?,
                target_type: row.get(1)?,
                target_id: row.get(2)?,
                dimension: row.get(3)?,
                value: row.get(4)?,
                scorer: scorer.parse().unwrap_or(Scorer::Heuristic),
                explanation: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ── Templates ──────────────────────────────────────────────────────

    pub fn upsert_template(&self, template: &Template) -> Result<()> {
        let conn = self.main.lock().unwrap();
        conn.execute(
            "INSERT INTO templates
             (name, source_branch, payload, version, task_types, tags, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(name) DO UPDATE SET
                source_branch = excluded.source_branch,
                payload       = excluded.payload,
                version       = templates.version + 1,
                task_types    = excluded.task_types,
                tags          = excluded.tags,
                status        = excluded.status,
                updated_at    = excluded.updated_at",
            rusqlite::params![
                template.name,
                template.source_branch,
                template.payload,
                template.version as i64,
                serde_json::to_string(&template.task_types)?,
                serde_json::to_string(&template.tags)?,
                template.status.to_string(),
                template.created_at,
                template.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_template(&self, name: &str) -> Result<Option<Template>> {
        let conn = self.main.lock().unwrap();
        match conn.query_row(
            "SELECT name, source_branch, payload, version, task_types, tags, status, created_at, updated_at
             FROM templates WHERE name = ?1",
            rusqlite::params![name],
            row_to_template,
        ) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_templates(&self) -> Result<Vec<Template>> {
        let conn = self.main.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT name, source_branch, payload, version, task_types, tags, status, created_at, updated_at
             FROM templates ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_template)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_template_status(&self, name: &str, status: TemplateStatus) -> Result<()> {
        let conn = self.main.lock().unwrap();
        let changed = conn.execute(
            "UPDATE templates SET status = ?1, updated_at = ?2 WHERE name = ?3",
            rusqlite::params![status.to_string(), now_rfc3339(), name],
        )?;
        if changed == 0 {
            return Err(engram_core::EngramError::not_found("template", name));
        }
        Ok(())
    }

    // ── Bundles ────────────────────────────────────────────────────────

    pub fn insert_bundle(&self, bundle: &Bundle) -> Result<()> {
        let conn = self.main.lock().unwrap();
        conn.execute(
            "INSERT INTO bundles (id, name, payload, verified_only, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                bundle.id,
                bundle.name,
                bundle.payload,
                bundle.verified_only as i64,
                bundle.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_bundle(&self, id: &str) -> Result<Option<Bundle>> {
        let conn = self.main.lock().unwrap();
        match conn.query_row(
            "SELECT id, name, payload, verified_only, created_at FROM bundles WHERE id = ?1",
            rusqlite::params![id],
            |row| {
                Ok(Bundle {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    payload: row.get(2)?,
                    verified_only: row.get::<_, i64>(3)? != 0,
                    created_at: row.get(4)?,
                })
            },
        ) {
            Ok(b) => Ok(Some(b)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ── Handoffs ───────────────────────────────────────────────────────

    pub fn insert_handoff(&self, handoff: &Handoff) -> Result<()> {
        let conn = self.main.lock().unwrap();
        conn.execute(
            "INSERT INTO handoffs
             (id, source_branch, target_branch, handoff_type, facts, conversations,
              context_summary, verification_status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                handoff.id,
                handoff.source_branch,
                handoff.target_branch,
                handoff.handoff_type,
                handoff.facts,
                handoff.conversations,
                handoff.context_summary,
                handoff.verification_status.to_string(),
                handoff.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_handoff(&self, id: &str) -> Result<Option<Handoff>> {
        let conn = self.main.lock().unwrap();
        match conn.query_row(
            "SELECT id, source_branch, target_branch, handoff_type, facts, conversations,
                    context_summary, verification_status, created_at
             FROM handoffs WHERE id = ?1",
            rusqlite::params![id],
            |row| {
                let status: String = row.get(7)?;
                Ok(Handoff {
                    id: row.get(0)?,
                    source_branch: row.get(1)?,
                    target_branch: row.get(2)?,
                    handoff_type: row.get(3)?,
                    facts: row.get(4)?,
                    conversations: row.get(5)?,
                    context_summary: row.get(6)?,
                    verification_status: status.parse().unwrap_or(VerificationStatus::Unverified),
                    created_at: row.get(8)?,
                })
            },
        ) {
            Ok(h) => Ok(Some(h)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ── Replays ────────────────────────────────────────────────────────

    pub fn insert_replay(&self, replay: &Replay) -> Result<()> {
        let conn = self.main.lock().unwrap();
        conn.execute(
            "INSERT INTO replays
             (id, conversation_id, source_conversation_id, fork_at, parameters, status,
              final_message_ids, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                replay.id,
                replay.conversation_id,
                replay.source_conversation_id,
                replay.fork_at as i64,
                replay.parameters.to_string(),
                replay.status.to_string(),
                replay
                    .final_message_ids
                    .as_ref()
                    .map(|v| serde_json::to_string(v).unwrap_or_default()),
                replay.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_replay(&self, id: &str) -> Result<Option<Replay>> {
        let conn = self.main.lock().unwrap();
        match conn.query_row(
            "SELECT id, conversation_id, source_conversation_id, fork_at, parameters, status,
                    final_message_ids, created_at
             FROM replays WHERE id = ?1",
            rusqlite::params![id],
            |row| {
                let params_raw: Option<String> = row.get(4)?;
                let status: String = row.get(5)?;
                let finals: Option<String> = row.get(6)?;
                Ok(Replay {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    source_conversation_id: row.get(2)?,
                    fork_at: row.get::<_, i64>(3)? as u32,
                    parameters: params_raw
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_else(|| serde_json::json!({})),
                    status: status.parse().unwrap_or(ReplayStatus::Pending),
                    final_message_ids: finals.and_then(|s| serde_json::from_str(&s).ok()),
                    created_at: row.get(7)?,
                })
            },
        ) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn complete_replay_row(&self, id: &str, final_message_ids: &[String]) -> Result<()> {
        let conn = self.main.lock().unwrap();
        let changed = conn.execute(
            "UPDATE replays SET status = 'completed', final_message_ids = ?1 WHERE id = ?2",
            rusqlite::params![serde_json::to_string(final_message_ids)?, id],
        )?;
        if changed == 0 {
            return Err(engram_core::EngramError::not_found("replay", id));
        }
        Ok(())
    }
}

fn row_to_template(row: &Row<'_>) -> rusqlite::Result<Template> {
    let status: String = row.get(6)?;
    Ok(Template {
        name: row.get(0)?,
        source_branch: row.get(1)?,
        payload: row.get(2)?,
        version: row.get::<_, i64>(3)? as u32,
        task_types: json_or(row.get(4)?),
        tags: json_or(row.get(5)?),
        status: status.parse().unwrap_or(TemplateStatus::Active),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
