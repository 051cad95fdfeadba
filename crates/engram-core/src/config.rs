use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18680;
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Name of the root branch; its tables use the bare entity names.
pub const ROOT_BRANCH: &str = "main";

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    OpenAi,
    Doubao,
    Mock,
}

/// Flat top-level config (engram.toml + ENGRAM_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngramConfig {
    #[serde(default = "default_db_path")]
    pub database_url: String,
    #[serde(default = "default_embedding_provider")]
    pub embedding_provider: EmbeddingProviderKind,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    /// API key for the LLM judge. Absent = judge disabled, heuristic scoring.
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    /// Shared token required on every request. Empty/absent = open access.
    pub api_key: Option<String>,
    /// Requests per minute per caller. 0 disables the limiter.
    #[serde(default)]
    pub rate_limit: u32,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    // Optional context carriers injected by the launching harness.
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
    pub parent_session: Option<String>,
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            database_url: default_db_path(),
            embedding_provider: default_embedding_provider(),
            embedding_dimension: default_embedding_dimension(),
            llm_api_key: None,
            llm_base_url: None,
            api_key: None,
            rate_limit: 0,
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            default_branch: default_branch(),
            task_id: None,
            agent_id: None,
            parent_session: None,
        }
    }
}

impl EngramConfig {
    /// Load config from a TOML file with ENGRAM_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.engram/engram.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: EngramConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ENGRAM_"))
            .extract()
            .map_err(|e| crate::error::EngramError::InvalidArgument {
                field: "config",
                reason: e.to_string(),
            })?;

        Ok(config)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_branch() -> String {
    ROOT_BRANCH.to_string()
}
fn default_embedding_provider() -> EmbeddingProviderKind {
    EmbeddingProviderKind::Mock
}
fn default_embedding_dimension() -> usize {
    1536
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.engram/engram.db", home)
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.engram/engram.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngramConfig::default();
        assert_eq!(cfg.default_branch, "main");
        assert_eq!(cfg.rate_limit, 0);
        assert_eq!(cfg.embedding_provider, EmbeddingProviderKind::Mock);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let cfg = EngramConfig::load(Some("/nonexistent/engram.toml")).expect("load failed");
        assert_eq!(cfg.port, DEFAULT_PORT);
    }
}
