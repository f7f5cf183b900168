pub mod circuit_breaker_admin;
pub mod health;
pub mod pr_webhook;
pub mod reliability_health;

use std::sync::Arc;

use axum::{Router, routing::{get, post}};

use crate::core::app_state::AppState;

/// Builds the full router for the four endpoints required by §6.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/pr-webhook", post(pr_webhook::pr_webhook_route))
        .route("/health", get(health::health_route))
        .route("/reliability-health", get(reliability_health::reliability_health_route))
        .route("/circuit-breaker-admin", post(circuit_breaker_admin::circuit_breaker_admin_route))
        .with_state(state)
}
