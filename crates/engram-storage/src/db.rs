use rusqlite::{Connection, Result};

use engram_core::types::EntityKind;

/// Canonical column DDL per branch-participating entity.
///
/// Forked branch tables are created with `CREATE TABLE … AS SELECT`, which
/// preserves this column order; empty branch tables reuse the same DDL so
/// `INSERT INTO dst SELECT * FROM src` stays valid across any two tables of
/// the same entity. JSON-typed values (embedding, metadata, properties,
/// tool_calls, objectives) are TEXT so row-level diff compares them bytewise.
pub fn entity_columns(entity: EntityKind) -> &'static str {
    match entity {
        EntityKind::Fact => {
            "id            TEXT PRIMARY KEY,
             text          TEXT NOT NULL,
             category      TEXT NOT NULL DEFAULT 'general',
             confidence    REAL NOT NULL DEFAULT 0.5,
             status        TEXT NOT NULL DEFAULT 'active',
             parent_id     TEXT,
             source_type   TEXT,
             source_id     TEXT,
             session_id    TEXT,
             task_id       TEXT,
             agent_id      TEXT,
             branch        TEXT NOT NULL,
             embedding     TEXT,
             metadata      TEXT NOT NULL DEFAULT '{}',
             created_at    TEXT NOT NULL,
             updated_at    TEXT NOT NULL,
             superseded_at TEXT"
        }
        EntityKind::Relation => {
            "id            TEXT PRIMARY KEY,
             source_entity TEXT NOT NULL,
             target_entity TEXT NOT NULL,
             relation_type TEXT NOT NULL,
             properties    TEXT NOT NULL DEFAULT '{}',
             confidence    REAL NOT NULL DEFAULT 0.5,
             branch        TEXT NOT NULL,
             valid_from    TEXT,
             valid_to      TEXT,
             created_at    TEXT NOT NULL"
        }
        EntityKind::Observation => {
            "id          TEXT PRIMARY KEY,
             session_id  TEXT NOT NULL,
             obs_type    TEXT NOT NULL,
             tool_name   TEXT,
             summary     TEXT NOT NULL,
             raw_input   TEXT,
             raw_output  TEXT,
             outcome     TEXT NOT NULL DEFAULT 'success',
             branch      TEXT NOT NULL,
             task_id     TEXT,
             agent_id    TEXT,
             embedding   TEXT,
             created_at  TEXT NOT NULL"
        }
        EntityKind::Conversation => {
            "id                     TEXT PRIMARY KEY,
             session_id             TEXT NOT NULL,
             agent_id               TEXT,
             task_id                TEXT,
             branch                 TEXT NOT NULL,
             title                  TEXT,
             status                 TEXT NOT NULL DEFAULT 'active',
             model                  TEXT,
             message_count          INTEGER NOT NULL DEFAULT 0,
             total_tokens           INTEGER NOT NULL DEFAULT 0,
             parent_conversation_id TEXT,
             fork_point_message_id  TEXT,
             metadata               TEXT NOT NULL DEFAULT '{}',
             created_at             TEXT NOT NULL"
        }
        EntityKind::Message => {
            "id              TEXT PRIMARY KEY,
             conversation_id TEXT NOT NULL,
             role            TEXT NOT NULL,
             content         TEXT NOT NULL,
             thinking        TEXT,
             tool_calls      TEXT,
             model           TEXT,
             sequence_num    INTEGER NOT NULL,
             token_count     INTEGER NOT NULL DEFAULT 0,
             session_id      TEXT,
             agent_id        TEXT,
             branch          TEXT NOT NULL,
             embedding       TEXT,
             metadata        TEXT NOT NULL DEFAULT '{}',
             created_at      TEXT NOT NULL"
        }
    }
}

/// The text column the full-text index covers, when the entity is searchable.
pub fn fulltext_column(entity: EntityKind) -> Option<&'static str> {
    match entity {
        EntityKind::Fact => Some("text"),
        EntityKind::Observation => Some("summary"),
        _ => None,
    }
}

/// Create one entity table (and nothing else) under the given name.
pub fn create_entity_table(conn: &Connection, entity: EntityKind, table: &str) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} ({});",
        entity_columns(entity)
    ))
}

/// Initialise every branch-independent table plus the root branch's entity
/// tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=3000;",
    )?;

    for entity in EntityKind::ALL {
        create_entity_table(conn, entity, entity.table_base())?;
    }

    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_facts_branch_status
            ON facts(status, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_observations_session
            ON observations(session_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, sequence_num);",
    )?;

    create_registry_tables(conn)?;
    Ok(())
}

fn create_registry_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS branches (
            name        TEXT PRIMARY KEY,
            parent      TEXT,
            status      TEXT NOT NULL DEFAULT 'active',
            description TEXT,
            metadata    TEXT NOT NULL DEFAULT '{}',
            created_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS merge_history (
            id         TEXT PRIMARY KEY,
            source     TEXT NOT NULL,
            target     TEXT NOT NULL,
            strategy   TEXT NOT NULL,
            merged     INTEGER NOT NULL DEFAULT 0,
            skipped    INTEGER NOT NULL DEFAULT 0,
            conflicted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS consolidation_history (
            id                     TEXT PRIMARY KEY,
            level                  TEXT NOT NULL,
            source_branch          TEXT NOT NULL,
            target_branch          TEXT NOT NULL,
            created_count          INTEGER NOT NULL DEFAULT 0,
            updated_count          INTEGER NOT NULL DEFAULT 0,
            deduplicated_count     INTEGER NOT NULL DEFAULT 0,
            observations_processed INTEGER NOT NULL DEFAULT 0,
            summary                TEXT,
            created_at             TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS tasks (
            id            TEXT PRIMARY KEY,
            name          TEXT NOT NULL,
            description   TEXT,
            task_type     TEXT,
            objectives    TEXT NOT NULL DEFAULT '[]',
            parent_branch TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS sessions (
            id                TEXT PRIMARY KEY,
            parent_session_id TEXT,
            branch            TEXT NOT NULL,
            task_id           TEXT,
            agent_id          TEXT,
            status            TEXT NOT NULL DEFAULT 'active',
            summary           TEXT,
            started_at        TEXT NOT NULL,
            ended_at          TEXT
        );
        CREATE TABLE IF NOT EXISTS snapshots (
            id         TEXT PRIMARY KEY,
            branch     TEXT NOT NULL,
            label      TEXT NOT NULL,
            payload    TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS scores (
            id          TEXT PRIMARY KEY,
            target_type TEXT NOT NULL,
            target_id   TEXT NOT NULL,
            dimension   TEXT NOT NULL,
            value       REAL NOT NULL,
            scorer      TEXT NOT NULL,
            explanation TEXT,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_scores_target
            ON scores(target_type, target_id);
        CREATE TABLE IF NOT EXISTS templates (
            name          TEXT PRIMARY KEY,
            source_branch TEXT NOT NULL,
            payload       TEXT NOT NULL,
            version       INTEGER NOT NULL DEFAULT 1,
            task_types    TEXT NOT NULL DEFAULT '[]',
            tags          TEXT NOT NULL DEFAULT '[]',
            status        TEXT NOT NULL DEFAULT 'active',
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS bundles (
            id            TEXT PRIMARY KEY,
            name          TEXT NOT NULL,
            payload       TEXT NOT NULL,
            verified_only INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS handoffs (
            id                  TEXT PRIMARY KEY,
            source_branch       TEXT NOT NULL,
            target_branch       TEXT NOT NULL,
            handoff_type        TEXT NOT NULL,
            facts               TEXT NOT NULL DEFAULT '[]',
            conversations       TEXT NOT NULL DEFAULT '[]',
            context_summary     TEXT NOT NULL DEFAULT '',
            verification_status TEXT NOT NULL DEFAULT 'unverified',
            created_at          TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS replays (
            id                     TEXT PRIMARY KEY,
            conversation_id        TEXT NOT NULL,
            source_conversation_id TEXT NOT NULL,
            fork_at                INTEGER NOT NULL,
            parameters             TEXT NOT NULL DEFAULT '{}',
            status                 TEXT NOT NULL DEFAULT 'pending',
            final_message_ids      TEXT,
            created_at             TEXT NOT NULL
        );",
    )
}
