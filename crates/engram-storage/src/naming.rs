use engram_core::config::ROOT_BRANCH;
use engram_core::types::EntityKind;

/// Reduce a branch name to the identifier embedded in table names.
/// `task/fix-auth/agent_1` → `task_fix_auth_agent_1`.
pub fn branch_slug(branch: &str) -> String {
    branch
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// Resolve the physical table for an entity on a branch.
/// The root branch owns the bare table names.
pub fn table_for(entity: EntityKind, branch: &str) -> String {
    if branch == ROOT_BRANCH {
        entity.table_base().to_string()
    } else {
        format!("{}_{}", entity.table_base(), branch_slug(branch))
    }
}

/// Name of the FTS5 shadow index for a searchable entity table.
pub fn fts_table_for(entity_table: &str) -> String {
    format!("{entity_table}_fts")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_branch_uses_bare_names() {
        assert_eq!(table_for(EntityKind::Fact, "main"), "facts");
        assert_eq!(table_for(EntityKind::Message, "main"), "messages");
    }

    #[test]
    fn branch_names_are_slugged() {
        assert_eq!(
            table_for(EntityKind::Fact, "task/fix-auth/agent_1"),
            "facts_task_fix_auth_agent_1"
        );
        assert_eq!(table_for(EntityKind::Observation, "feature_x"), "observations_feature_x");
    }
}
