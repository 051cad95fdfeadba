use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use engram_core::error::Result;
use engram_core::types::{new_id, now_rfc3339, EntityKind, Fact, Snapshot};
use engram_core::EngramError;
use engram_storage::{table_for, Storage};

/// App-level snapshots plus point-in-time reads.
///
/// A snapshot payload is the serialized row set of every entity table on
/// the branch. A storage-native snapshot (`VACUUM INTO`) can be taken
/// alongside; its file path is recorded in the payload.
pub struct SnapshotEngine {
    storage: Arc<Storage>,
}

impl SnapshotEngine {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    #[instrument(skip(self), fields(branch, label))]
    pub fn create(&self, branch: &str, label: &str, native: bool) -> Result<Snapshot> {
        self.storage
            .get_branch(branch)?
            .ok_or_else(|| EngramError::not_found("branch", branch))?;

        let mut payload = serde_json::Map::new();
        for entity in EntityKind::ALL {
            let rows = self.storage.dump_rows(&table_for(entity, branch))?;
            payload.insert(entity.table_base().to_string(), serde_json::Value::from(rows));
        }
        if native {
            // Best-effort: a failed native snapshot does not lose the
            // app-level payload.
            match self.storage.native_snapshot(label) {
                Ok(path) => {
                    payload.insert("native_path".to_string(), serde_json::Value::from(path));
                }
                Err(e) => warn!(error = %e, "native snapshot failed, keeping app-level payload"),
            }
        }

        let snapshot = Snapshot {
            id: new_id(),
            branch: branch.to_string(),
            label: label.to_string(),
            payload: serde_json::Value::Object(payload).to_string(),
            created_at: now_rfc3339(),
        };
        self.storage.insert_snapshot(&snapshot)?;
        info!(id = %snapshot.id, "snapshot created");
        Ok(snapshot)
    }

    pub fn get(&self, id: &str) -> Result<Snapshot> {
        self.storage
            .get_snapshot(id)?
            .ok_or_else(|| EngramError::not_found("snapshot", id))
    }

    pub fn list(&self, branch: Option<&str>) -> Result<Vec<Snapshot>> {
        self.storage.list_snapshots(branch)
    }

    /// Point-in-time read of a branch's facts. A timestamp earlier than
    /// the earliest row yields an empty view, not an error.
    pub fn time_travel(&self, branch: &str, at: &str) -> Result<Vec<Fact>> {
        self.storage
            .get_branch(branch)?
            .ok_or_else(|| EngramError::not_found("branch", branch))?;
        chrono::DateTime::parse_from_rfc3339(at)
            .map_err(|e| EngramError::invalid("at", format!("not an RFC3339 timestamp: {e}")))?;
        self.storage.list_facts_as_of(branch, at)
    }

    /// Rewrite the branch's entity tables to the snapshot state, one
    /// transaction per entity.
    #[instrument(skip(self, cancel), fields(snapshot_id))]
    pub fn restore(&self, snapshot_id: &str, cancel: &CancellationToken) -> Result<()> {
        let snapshot = self.get(snapshot_id)?;
        self.storage
            .get_branch(&snapshot.branch)?
            .ok_or_else(|| EngramError::not_found("branch", &snapshot.branch))?;

        let payload: serde_json::Value = serde_json::from_str(&snapshot.payload)?;
        for entity in EntityKind::ALL {
            if cancel.is_cancelled() {
                return Err(EngramError::Cancelled);
            }
            let rows: Vec<serde_json::Value> = payload[entity.table_base()]
                .as_array()
                .cloned()
                .unwrap_or_default();
            self.storage
                .replace_rows(&table_for(entity, &snapshot.branch), &rows)?;
            self.storage.rebuild_fts(entity, &snapshot.branch)?;
        }
        info!(branch = %snapshot.branch, "branch restored from snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::types::FactStatus;

    fn fact(id: &str, text: &str) -> Fact {
        let now = now_rfc3339();
        Fact {
            id: id.to_string(),
            text: text.to_string(),
            category: "general".to_string(),
            confidence: 0.5,
            status: FactStatus::Active,
            parent_id: None,
            source_type: None,
            source_id: None,
            session_id: None,
            task_id: None,
            agent_id: None,
            branch: "main".to_string(),
            embedding: None,
            metadata: serde_json::json!({}),
            created_at: now.clone(),
            updated_at: now,
            superseded_at: None,
        }
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let engine = SnapshotEngine::new(storage.clone());
        storage.insert_fact(&fact("f-1", "before snapshot")).unwrap();

        let snapshot = engine.create("main", "baseline", false).unwrap();
        storage.insert_fact(&fact("f-2", "after snapshot")).unwrap();
        assert_eq!(storage.list_facts("main", None, None).unwrap().len(), 2);

        engine.restore(&snapshot.id, &CancellationToken::new()).unwrap();
        let facts = storage.list_facts("main", None, None).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].id, "f-1");
    }

    #[test]
    fn time_travel_before_history_is_empty() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let engine = SnapshotEngine::new(storage.clone());
        storage.insert_fact(&fact("f-1", "exists now")).unwrap();

        let ancient = "2000-01-01T00:00:00+00:00";
        assert!(engine.time_travel("main", ancient).unwrap().is_empty());

        let future = "2100-01-01T00:00:00+00:00";
        assert_eq!(engine.time_travel("main", future).unwrap().len(), 1);
    }

    #[test]
    fn time_travel_excludes_rows_superseded_by_then() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let engine = SnapshotEngine::new(storage.clone());
        storage.insert_fact(&fact("f-1", "old version")).unwrap();
        storage
            .update_fact_status("main", "f-1", FactStatus::Superseded)
            .unwrap();

        let future = "2100-01-01T00:00:00+00:00";
        assert!(engine.time_travel("main", future).unwrap().is_empty());
    }

    #[test]
    fn bad_timestamp_is_invalid_argument() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let engine = SnapshotEngine::new(storage);
        let err = engine.time_travel("main", "yesterday").unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }
}
