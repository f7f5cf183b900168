use std::sync::Arc;

use axum::{extract::State, http::{HeaderMap, StatusCode}, response::Response};
use serde_json::json;
use tracing::instrument;

use crate::core::app_state::AppState;
use crate::core::auth::require_function_key;
use crate::core::http::response_envelope::ApiResponse;
use crate::error_handler::to_api_response;

/// `GET /reliability-health` (§6): snapshot of every circuit breaker's
/// current state, for operator dashboards.
#[instrument(name = "reliability_health_route", skip(state, headers))]
pub async fn reliability_health_route(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(err) = require_function_key(&state, &headers) {
        return to_api_response(&err);
    }

    let snapshot = state.ctx.breakers.snapshot().await;
    ApiResponse::success(json!({ "breakers": snapshot })).into_response_with_status(StatusCode::OK)
}
