use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use engram_core::EngramError;

/// Newtype so engine errors become consistent HTTP error bodies:
/// `{"error": "...", "code": "NOT_FOUND"}` with a matching status.
pub struct ApiError(pub EngramError);

impl From<EngramError> for ApiError {
    fn from(e: EngramError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngramError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngramError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            EngramError::Conflict(_) => StatusCode::CONFLICT,
            EngramError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            EngramError::Backend(_)
            | EngramError::EmbeddingUnavailable(_)
            | EngramError::JudgeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngramError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            EngramError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
