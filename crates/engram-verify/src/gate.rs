use serde::Serialize;

use engram_core::error::Result;
use engram_core::types::{FactStatus, VerificationStatus};
use engram_storage::Storage;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GateCounts {
    pub verified: u64,
    pub unverified: u64,
    pub invalidated: u64,
}

/// The merge gate: may this branch's facts be promoted?
///
/// Any invalidated fact blocks the merge outright. With `require_verified`
/// every active fact must be verified; facts never scored count as
/// unverified. The gate is advisory — callers decide whether to enforce it
/// before `MergeEngine::merge`.
pub fn can_merge(
    storage: &Storage,
    source_branch: &str,
    require_verified: bool,
) -> Result<(bool, GateCounts)> {
    let facts = storage.list_facts(source_branch, Some(FactStatus::Active), None)?;
    let mut counts = GateCounts::default();

    for fact in &facts {
        let status = fact.metadata["verification_status"]
            .as_str()
            .and_then(|s| s.parse::<VerificationStatus>().ok())
            .unwrap_or(VerificationStatus::Unverified);
        match status {
            VerificationStatus::Verified => counts.verified += 1,
            VerificationStatus::Unverified => counts.unverified += 1,
            VerificationStatus::Invalidated => counts.invalidated += 1,
        }
    }

    let ok = counts.invalidated == 0 && (!require_verified || counts.unverified == 0);
    Ok((ok, counts))
}
