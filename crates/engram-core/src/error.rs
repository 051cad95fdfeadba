use thiserror::Error;

/// The closed error taxonomy exposed by every engine.
///
/// Best-effort dependencies (embedding, judge) are recovered inside the
/// engines and never cross an engine boundary; everything else propagates
/// unchanged. Partial successes do not exist: either the row is written or
/// it is not, either the branch is created or it is not.
#[derive(Debug, Error)]
pub enum EngramError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid argument '{field}': {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("storage backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("llm judge unavailable: {0}")]
    JudgeUnavailable(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngramError {
    /// Short error code string sent to clients in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngramError::NotFound { .. } => "NOT_FOUND",
            EngramError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            EngramError::Conflict(_) => "CONFLICT",
            EngramError::PreconditionFailed(_) => "PRECONDITION_FAILED",
            EngramError::Backend(_) => "BACKEND_UNAVAILABLE",
            EngramError::EmbeddingUnavailable(_) => "EMBEDDING_UNAVAILABLE",
            EngramError::JudgeUnavailable(_) => "JUDGE_UNAVAILABLE",
            EngramError::Cancelled => "CANCELLED",
            EngramError::Fatal(_) => "FATAL",
        }
    }

    /// Convenience constructor for the common not-found case.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngramError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Convenience constructor for argument validation failures.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EngramError::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }
}

// Malformed JSON in a column we wrote ourselves means the store is out of
// sync with the code — an invariant violation, not a client error.
impl From<serde_json::Error> for EngramError {
    fn from(e: serde_json::Error) -> Self {
        EngramError::Fatal(format!("stored JSON is corrupt: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, EngramError>;
