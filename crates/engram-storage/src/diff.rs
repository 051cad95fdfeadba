use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use engram_core::error::Result;
use engram_core::types::ConflictPolicy;
use engram_core::types::MergeCounts;

use crate::store::{dump_rows_conn, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOp {
    /// Row exists in the source table only.
    Insert,
    /// Row exists in both tables with differing columns.
    Update,
    /// Row exists in the target table only.
    Delete,
}

/// One differing row between two tables of the same entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowDiff {
    pub op: DiffOp,
    pub id: String,
    /// The source row for insert/update, the target row for delete.
    pub row: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiffCounts {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl DiffCounts {
    pub fn total(&self) -> u64 {
        self.inserts + self.updates + self.deletes
    }
}

/// Columns ignored when deciding whether two rows differ. The `branch`
/// label is rewritten on fork and merge by design; timestamps churn on
/// supersede without changing knowledge content.
const VOLATILE_COLUMNS: [&str; 2] = ["branch", "updated_at"];

fn strip_volatile(row: &serde_json::Value) -> BTreeMap<String, serde_json::Value> {
    row.as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(k, _)| !VOLATILE_COLUMNS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

impl Storage {
    /// DIFF: label every row that differs between tables `a` (source) and
    /// `b` (target) as insert, update, or delete.
    pub fn diff_rows(&self, a: &str, b: &str) -> Result<Vec<RowDiff>> {
        let conn = self.main.lock().unwrap();
        let src = dump_rows_conn(&conn, a)?;
        let dst = dump_rows_conn(&conn, b)?;
        drop(conn);

        let dst_by_id: BTreeMap<String, &serde_json::Value> = dst
            .iter()
            .filter_map(|r| r["id"].as_str().map(|id| (id.to_string(), r)))
            .collect();
        let src_ids: std::collections::HashSet<&str> =
            src.iter().filter_map(|r| r["id"].as_str()).collect();

        let mut out = Vec::new();
        for row in &src {
            let Some(id) = row["id"].as_str() else { continue };
            match dst_by_id.get(id) {
                None => out.push(RowDiff {
                    op: DiffOp::Insert,
                    id: id.to_string(),
                    row: row.clone(),
                }),
                Some(target) => {
                    if strip_volatile(row) != strip_volatile(target) {
                        out.push(RowDiff {
                            op: DiffOp::Update,
                            id: id.to_string(),
                            row: row.clone(),
                        });
                    }
                }
            }
        }
        for row in &dst {
            let Some(id) = row["id"].as_str() else { continue };
            if !src_ids.contains(id) {
                out.push(RowDiff {
                    op: DiffOp::Delete,
                    id: id.to_string(),
                    row: row.clone(),
                });
            }
        }
        debug!(a, b, changes = out.len(), "tables diffed");
        Ok(out)
    }

    /// Count-only variant of [`Storage::diff_rows`].
    pub fn diff_count(&self, a: &str, b: &str) -> Result<DiffCounts> {
        let mut counts = DiffCounts::default();
        for d in self.diff_rows(a, b)? {
            match d.op {
                DiffOp::Insert => counts.inserts += 1,
                DiffOp::Update => counts.updates += 1,
                DiffOp::Delete => counts.deletes += 1,
            }
        }
        Ok(counts)
    }

    /// MERGE: apply the diff of `src` into `dst` under a conflict policy.
    ///
    /// `accept` applies inserts and updates (rows the target lacks or holds
    /// an older version of); `skip` applies nothing and reports what it
    /// declined. Neither policy deletes target-only rows — a merge into a
    /// shared branch must not drop knowledge the source never saw. All
    /// applied rows are re-labelled with `target_branch`. Runs in one
    /// transaction; partial application is impossible.
    pub fn merge_rows(
        &self,
        src: &str,
        dst: &str,
        target_branch: &str,
        policy: ConflictPolicy,
    ) -> Result<MergeCounts> {
        let diff = self.diff_rows(src, dst)?;
        let mut counts = MergeCounts::default();

        let mut conn = self.main.lock().unwrap();
        let tx = conn.transaction()?;
        for d in &diff {
            match d.op {
                DiffOp::Insert | DiffOp::Update => {
                    if d.op == DiffOp::Update {
                        counts.conflicted += 1;
                    }
                    match policy {
                        ConflictPolicy::Accept => {
                            tx.execute(
                                &format!(
                                    "INSERT OR REPLACE INTO {dst} SELECT * FROM {src} WHERE id = ?1"
                                ),
                                rusqlite::params![d.id],
                            )?;
                            counts.merged += 1;
                        }
                        ConflictPolicy::Skip => {
                            counts.skipped += 1;
                        }
                    }
                }
                // Target-only rows are left alone under both policies.
                DiffOp::Delete => {}
            }
        }
        if counts.merged > 0 {
            tx.execute(
                &format!("UPDATE {dst} SET branch = ?1 WHERE branch != ?1"),
                rusqlite::params![target_branch],
            )?;
        }
        tx.commit()?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Storage;
    use engram_core::types::EntityKind;

    fn fact_row(id: &str, text: &str, branch: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id, "text": text, "category": "general", "confidence": 0.5,
            "status": "active", "parent_id": null, "source_type": null,
            "source_id": null, "session_id": null, "task_id": null,
            "agent_id": null, "branch": branch, "embedding": null,
            "metadata": "{}", "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z", "superseded_at": null
        })
    }

    fn forked(store: &Storage) {
        store
            .fork_table(EntityKind::Fact, "facts", "facts_b", "b", true)
            .unwrap();
    }

    #[test]
    fn diff_labels_insert_update_delete() {
        let store = Storage::open_in_memory().unwrap();
        store.insert_row("facts", &fact_row("a", "kept", "main")).unwrap();
        store.insert_row("facts", &fact_row("c", "target only", "main")).unwrap();
        forked(&store);
        // mutate the fork: change one row, add one, and remove target-only
        store.insert_row("facts_b", &fact_row("a", "changed", "b")).unwrap();
        store.insert_row("facts_b", &fact_row("d", "new", "b")).unwrap();
        let conn = store.main.lock().unwrap();
        conn.execute("DELETE FROM facts_b WHERE id = 'c'", []).unwrap();
        drop(conn);

        let diff = store.diff_rows("facts_b", "facts").unwrap();
        let op_for = |id: &str| diff.iter().find(|d| d.id == id).map(|d| d.op);
        assert_eq!(op_for("d"), Some(DiffOp::Insert));
        assert_eq!(op_for("a"), Some(DiffOp::Update));
        assert_eq!(op_for("c"), Some(DiffOp::Delete));

        let counts = store.diff_count("facts_b", "facts").unwrap();
        assert_eq!((counts.inserts, counts.updates, counts.deletes), (1, 1, 1));
    }

    #[test]
    fn branch_label_alone_is_not_a_difference() {
        let store = Storage::open_in_memory().unwrap();
        store.insert_row("facts", &fact_row("a", "same", "main")).unwrap();
        forked(&store);
        // fork rewrote branch to 'b'; content identical
        assert!(store.diff_rows("facts_b", "facts").unwrap().is_empty());
    }

    #[test]
    fn merge_skip_applies_nothing() {
        let store = Storage::open_in_memory().unwrap();
        store.insert_row("facts", &fact_row("a", "original", "main")).unwrap();
        forked(&store);
        store.insert_row("facts_b", &fact_row("b", "new on fork", "b")).unwrap();

        let counts = store
            .merge_rows("facts_b", "facts", "main", ConflictPolicy::Skip)
            .unwrap();
        assert_eq!(counts.merged, 0);
        assert_eq!(counts.skipped, 1);
        assert_eq!(store.dump_rows("facts").unwrap().len(), 1);
    }

    #[test]
    fn merge_accept_into_forked_branch_replaces_rows() {
        let store = Storage::open_in_memory().unwrap();
        store.insert_row("facts", &fact_row("a", "original", "main")).unwrap();
        forked(&store);
        // main moves on; the forked branch holds the stale version
        store.insert_row("facts", &fact_row("a", "rewritten on main", "main")).unwrap();

        let counts = store
            .merge_rows("facts", "facts_b", "b", ConflictPolicy::Accept)
            .unwrap();
        assert_eq!(counts.merged, 1);
        assert_eq!(counts.conflicted, 1);

        // the forked table keeps its PRIMARY KEY, so the update replaces
        // the row instead of duplicating its id
        let rows = store.dump_rows("facts_b").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["text"], "rewritten on main");
    }

    #[test]
    fn merge_accept_is_idempotent() {
        let store = Storage::open_in_memory().unwrap();
        store.insert_row("facts", &fact_row("a", "original", "main")).unwrap();
        forked(&store);
        store.insert_row("facts_b", &fact_row("a", "rewritten", "b")).unwrap();
        store.insert_row("facts_b", &fact_row("b", "new on fork", "b")).unwrap();

        let first = store
            .merge_rows("facts_b", "facts", "main", ConflictPolicy::Accept)
            .unwrap();
        assert_eq!(first.merged, 2);
        assert_eq!(first.conflicted, 1);

        let rows_after_first = store.dump_rows("facts").unwrap();
        let second = store
            .merge_rows("facts_b", "facts", "main", ConflictPolicy::Accept)
            .unwrap();
        assert_eq!(second.merged, 0);
        assert_eq!(store.dump_rows("facts").unwrap(), rows_after_first);
    }
}
