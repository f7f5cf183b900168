mod config;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use ai_llm_service::config::default_config::{config_ollama_embedding, config_ollama_fast, config_ollama_slow};
use ai_llm_service::LlmServiceProfiles;
use api::AppState;
use git_platform::git_providers::{ProviderClient, ProviderConfig, ProviderKind};
use reliability::{CircuitBreakerManager, RateLimiter};
use review_core::orchestrator::AppContext;
use table_store::file_store::FileTableStore;

use crate::config::AppConfig;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_provider_kind(raw: &str) -> Result<ProviderKind, Box<dyn Error>> {
    match raw.to_ascii_lowercase().as_str() {
        "gitlab" => Ok(ProviderKind::GitLab),
        "github" => Ok(ProviderKind::GitHub),
        "bitbucket" => Ok(ProviderKind::Bitbucket),
        other => Err(format!("unknown GIT_PROVIDER_KIND '{other}'").into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Load environment variables from .env file.
    // Fails if .env file not found, not readable or invalid.
    dotenvy::dotenv()?;
    init_tracing();

    let cfg = AppConfig::from_env()?;

    let provider = ProviderClient::from_config(ProviderConfig {
        kind: parse_provider_kind(&cfg.git_provider_kind)?,
        base_api: cfg.git_base_api.clone(),
        token: cfg.git_token.clone(),
    })?;

    let llm = LlmServiceProfiles::new(
        config_ollama_fast()?,
        Some(config_ollama_slow()?),
        config_ollama_embedding()?,
        None,
    )?;

    let breakers = CircuitBreakerManager::new(
        cfg.circuit_breaker_threshold,
        Duration::from_secs(cfg.circuit_breaker_timeout_secs),
    );

    let store = match &cfg.store_dir {
        Some(dir) => FileTableStore::new(dir.clone()),
        None => FileTableStore::from_env_or_default(),
    };

    let ctx = Arc::new(AppContext::new(
        provider,
        llm,
        breakers,
        store,
        cfg.dry_run,
        cfg.max_concurrent_reviews,
    ));

    let rate_limiter = RateLimiter::new(cfg.rate_limit_requests_per_minute);

    let state = Arc::new(AppState {
        ctx: ctx.clone(),
        webhook_secret: cfg.webhook_secret.clone(),
        function_key: cfg.function_key.clone(),
        rate_limiter,
    });

    tokio::spawn(feedback::run_forever(
        ctx,
        Duration::from_secs(cfg.feedback_harvest_period_secs),
    ));

    api::start(state, &cfg.bind_addr).await?;

    Ok(())
}
