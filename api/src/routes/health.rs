use std::sync::Arc;

use axum::{extract::State, http::{HeaderMap, StatusCode}, response::Response};
use serde_json::json;
use tracing::instrument;

use crate::core::app_state::AppState;
use crate::core::auth::require_function_key;
use crate::core::http::response_envelope::ApiResponse;
use crate::error_handler::{AppError, to_api_response};

/// `GET /health` (§6): probes every configured LLM profile and reports
/// overall reachability.
#[instrument(name = "health_route", skip(state, headers))]
pub async fn health_route(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(err) = require_function_key(&state, &headers) {
        return to_api_response(&err);
    }

    match state.ctx.llm.health_all().await {
        Ok(statuses) => {
            let overall_ok = statuses.iter().all(|s| s.ok);
            let status = if overall_ok {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            ApiResponse::success(json!({ "ok": overall_ok, "providers": statuses }))
                .into_response_with_status(status)
        }
        Err(e) => to_api_response(&AppError::Internal(e.to_string())),
    }
}
