pub mod analytics;
pub mod branches;
pub mod consolidate;
pub mod conversations;
pub mod exchange;
pub mod facts;
pub mod health;
pub mod observations;
pub mod relations;
pub mod replays;
pub mod sessions;
pub mod snapshots;
pub mod tasks;
pub mod verify;
