use std::sync::Arc;

use reliability::RateLimiter;
use review_core::orchestrator::AppContext;

/// Shared state handed to every handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// The review domain's wired-up dependencies (provider, LLM, breakers,
    /// store) — built once in `main` and shared across requests.
    pub ctx: Arc<AppContext>,
    /// Shared secret the `X-Webhook-Secret` header must match on
    /// `POST /pr-webhook` (§6).
    pub webhook_secret: String,
    /// Function-scoped auth key required by `/health`, `/reliability-health`
    /// and `/circuit-breaker-admin` (§6).
    pub function_key: String,
    /// Inbound webhook rate limiter (§4.11).
    pub rate_limiter: RateLimiter,
}
