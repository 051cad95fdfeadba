pub mod engine;

pub use engine::SnapshotEngine;
