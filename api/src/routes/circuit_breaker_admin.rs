use std::sync::Arc;

use axum::{Json, extract::State, http::{HeaderMap, StatusCode}, response::Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::core::app_state::AppState;
use crate::core::auth::require_function_key;
use crate::core::http::response_envelope::ApiResponse;
use crate::error_handler::to_api_response;

/// `POST /circuit-breaker-admin` (§6): manually forces a named breaker back
/// to CLOSED.
#[derive(Debug, Deserialize)]
pub struct CircuitBreakerAdminRequest {
    pub service: String,
}

#[instrument(name = "circuit_breaker_admin_route", skip(state, headers, body), fields(service = %body.service))]
pub async fn circuit_breaker_admin_route(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CircuitBreakerAdminRequest>,
) -> Response {
    if let Err(err) = require_function_key(&state, &headers) {
        return to_api_response(&err);
    }

    match state.ctx.breakers.reset(&body.service).await {
        Ok(()) => {
            info!(service = %body.service, "circuit_breaker_admin_route: breaker reset");
            ApiResponse::success(json!({ "service": body.service, "reset": true }))
                .into_response_with_status(StatusCode::OK)
        }
        Err(e) => to_api_response(&review_core::errors::Error::Reliability(e).into()),
    }
}
