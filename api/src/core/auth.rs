use axum::http::HeaderMap;
use services::secret_compare::constant_time_eq;

use crate::core::app_state::AppState;
use crate::error_handler::AppError;

/// Validates the `X-Function-Key` header against `state.function_key`, used
/// by `/health`, `/reliability-health` and `/circuit-breaker-admin` (§6).
pub fn require_function_key(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let provided = headers
        .get("x-function-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if constant_time_eq(provided, &state.function_key) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

/// Extracts the rate-limiter client id: first token of `X-Forwarded-For`,
/// else `"unknown"` (§4.11).
pub fn client_id(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
