//! `engram-write` — the four ingestion engines.
//!
//! Every write path runs the same pre-commit pipeline: validate the input,
//! embed the primary text best-effort, persist in a single transaction.
//! Embedding failures never block persistence — the row lands with a null
//! embedding and a later backfill pass can fill it in.

pub mod backfill;
pub mod fact;
pub mod message;
pub mod observation;
pub mod pipeline;
pub mod relation;

pub use fact::{FactEngine, NewFact};
pub use message::{MessageEngine, NewMessage};
pub use observation::{NewObservation, ObservationEngine};
pub use relation::{NewRelation, RelationEngine};
