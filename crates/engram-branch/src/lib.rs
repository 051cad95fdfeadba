//! `engram-branch` — branch lifecycle and the four merge strategies.
//!
//! A branch is a set of per-entity sibling tables plus one registry row.
//! Creation forks tables over the autocommit DDL channel and publishes the
//! registry entry last, so a branch is never listable before its tables
//! exist. Merging never mutates the source branch and always appends a
//! merge-history row.

pub mod engine;
pub mod merge;
pub mod names;

pub use engine::{BranchEngine, BranchDiff, CreateBranchOptions};
pub use merge::{MergeEngine, MergeRequest};
pub use names::validate_branch_name;
