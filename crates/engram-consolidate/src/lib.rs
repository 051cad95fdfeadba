//! `engram-consolidate` — distilling raw observations into durable facts.
//!
//! Three levels, all explicit calls (no internal scheduler):
//!
//! | Level   | Input                            | Output                               |
//! |---------|----------------------------------|--------------------------------------|
//! | session | one session's observations       | new facts at 0.7, boosts on repeats  |
//! | agent   | all facts on an agent's branch   | deduplicated set + a summary fact    |
//! | task    | all facts on a task's branch     | durable / ephemeral classification   |
//!
//! Dedup is token-Jaccard at 0.85 over lowercased non-alphanumeric-split
//! tokens; every duplicate collision boosts confidence by 0.1 (clamped to
//! 1.0, at most once per fact per run). Every run appends an audit row,
//! empty input included — reruns converge because dedup is idempotent.

pub mod category;
pub mod dedup;
pub mod engine;

pub use engine::{ConsolidationEngine, TaskConsolidation};
