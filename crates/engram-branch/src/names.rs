use engram_core::error::Result;
use engram_core::EngramError;

/// Prefixes reserved for internal use; user branches may not claim them.
pub const RESERVED_PREFIXES: [&str; 2] = ["system", "tmp"];

/// Validate a branch name against the naming convention:
///
/// - plain identifiers: `feature_x`, `main`, `scratch-2`
/// - task branches: `task/⟨slug⟩` or `task/⟨slug⟩/⟨agent⟩`
/// - template branches: `template/⟨name⟩`
/// - experiment branches: `experiment/⟨desc⟩`
///
/// Segments are lowercase `[a-z0-9_-]`, non-empty, with no leading or
/// trailing slash.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EngramError::invalid("branch", "name must not be empty"));
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err(EngramError::invalid(
            "branch",
            format!("'{name}' has a leading or trailing slash"),
        ));
    }

    let segments: Vec<&str> = name.split('/').collect();
    for seg in &segments {
        if seg.is_empty() {
            return Err(EngramError::invalid(
                "branch",
                format!("'{name}' contains an empty segment"),
            ));
        }
        if !seg
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(EngramError::invalid(
                "branch",
                format!("segment '{seg}' must be lowercase [a-z0-9_-]"),
            ));
        }
    }

    if RESERVED_PREFIXES.contains(&segments[0]) {
        return Err(EngramError::invalid(
            "branch",
            format!("'{}' is a reserved prefix", segments[0]),
        ));
    }

    match (segments[0], segments.len()) {
        (_, 1) => Ok(()),
        ("task", 2) | ("task", 3) => Ok(()),
        ("template", 2) | ("experiment", 2) => Ok(()),
        (prefix, _) => Err(EngramError::invalid(
            "branch",
            format!("'{prefix}/…' is not a recognized branch form"),
        )),
    }
}
