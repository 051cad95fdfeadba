//! `engram-storage` — the storage adapter behind every engine.
//!
//! One SQLite database holds everything. The five branch-participating
//! entities (facts, relations, observations, conversations, messages) get a
//! physical table per branch; the root branch uses the bare table names and
//! every other branch uses `⟨base⟩_⟨slug⟩`. Registry and audit entities live
//! in single shared tables.
//!
//! Two connections are held: the transactional connection used by all row
//! operations, and the autocommit channel used exclusively for DDL (branch
//! forks, drops, native snapshots) because DDL must never run inside an open
//! transaction.
//!
//! Full-text ranking uses FTS5 external-content indexes when the build has
//! FTS5; otherwise a LIKE-tokenized fallback computes word-overlap scores in
//! process. Vector similarity is cosine over JSON-as-text embedding columns.

pub mod db;
pub mod diff;
pub mod naming;
pub mod registry;
pub mod rows;
pub mod store;
pub mod text;
pub mod vector;

pub use diff::{DiffCounts, DiffOp, RowDiff};
pub use naming::{branch_slug, table_for};
pub use store::Storage;
