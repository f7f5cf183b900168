use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use git_platform::git_providers::ProviderKind;
use reliability::RateLimitDecision;
use review_core::models::PrEvent;
use review_core::orchestrator::handle_pr_event;
use services::secret_compare::constant_time_eq;

use crate::core::app_state::AppState;
use crate::core::auth::client_id;
use crate::core::http::response_envelope::ApiResponse;
use crate::error_handler::{AppError, to_api_response};

/// Inbound webhook payload (§6): PR id, repository, refs, commit id and the
/// event type that triggered delivery.
#[derive(Debug, Deserialize)]
pub struct PrWebhookRequest {
    pub event_type: String,
    pub repository: String,
    pub pr_id: String,
    pub provider: String,
    pub source_commit_id: String,
    pub target_branch: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
}

fn parse_provider(raw: &str) -> Result<ProviderKind, AppError> {
    match raw.to_ascii_lowercase().as_str() {
        "gitlab" => Ok(ProviderKind::GitLab),
        "github" => Ok(ProviderKind::GitHub),
        "bitbucket" => Ok(ProviderKind::Bitbucket),
        other => Err(AppError::BadRequest(format!("unknown provider '{other}'"))),
    }
}

#[instrument(name = "pr_webhook_route", skip(state, headers, body), fields(repository = %body.repository, pr_id = %body.pr_id))]
pub async fn pr_webhook_route(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PrWebhookRequest>,
) -> Response {
    match handle(&state, &headers, body).await {
        Ok(resp) => resp,
        Err(err) => {
            warn!(error = %err, "pr_webhook_route: rejected or failed");
            to_api_response(&err)
        }
    }
}

async fn handle(
    state: &AppState,
    headers: &HeaderMap,
    body: PrWebhookRequest,
) -> Result<Response, AppError> {
    let provided_secret = headers
        .get("x-webhook-secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !constant_time_eq(provided_secret, &state.webhook_secret) {
        return Err(AppError::Unauthorized);
    }

    let client = client_id(headers);
    if let RateLimitDecision::Limited { retry_after_secs } = state.rate_limiter.check(&client).await {
        return Err(AppError::RateLimited { retry_after_secs });
    }

    let provider = parse_provider(&body.provider)?;
    // title/author_email aren't part of the orchestrator's dedup/fetch
    // contract (PrEvent); they're accepted for forward compatibility and
    // otherwise unused.
    let _ = (&body.title, &body.author_email);

    let event = PrEvent::new(
        body.event_type,
        body.repository,
        body.pr_id,
        provider,
        body.source_commit_id,
        body.target_branch,
    )?;

    info!(repository = %event.repository, pr_id = %event.pr_id, "pr_webhook_route: dispatching to orchestrator");

    let result = handle_pr_event(&state.ctx, event).await?;

    let envelope = ApiResponse::success(json!({
        "repository": result.repository,
        "pr_id": result.pr_id,
        "issue_count": result.issues.len(),
        "recommendation": format!("{:?}", result.recommendation),
        "truncated": result.truncated,
    }));
    Ok(envelope.into_response_with_status(StatusCode::ACCEPTED))
}
