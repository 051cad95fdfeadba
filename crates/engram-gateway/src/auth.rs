use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::app::AppState;

/// Shared-token gate plus the per-caller rate limiter.
///
/// An empty/absent `api_key` means open access. The health probe is exempt
/// from both checks so orchestrators can always see liveness.
pub async fn guard(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    if let Some(expected) = state.config.api_key.as_ref().filter(|k| !k.is_empty()) {
        if presented.as_deref() != Some(expected.as_str()) {
            warn!(path = %req.uri().path(), "rejected request with bad token");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid or missing token", "code": "AUTH_FAILED" })),
            )
                .into_response();
        }
    }

    // Caller key: the token when present, else the peer IP (available via
    // ConnectInfo when the router is served with connect info). The limiter
    // is in-memory and per-process.
    let caller = presented.unwrap_or_else(|| {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "anonymous".to_string())
    });
    if !state.limiter.allow(&caller) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "rate limit exceeded", "code": "RATE_LIMITED" })),
        )
            .into_response();
    }

    next.run(req).await
}
