pub mod core;
pub mod error_handler;
pub mod middleware_layer;
pub mod routes;

use std::sync::Arc;

use axum::middleware;
use tracing::info;

pub use crate::core::app_state::AppState;
pub use crate::error_handler::{AppError, AppResult};

/// Binds and serves the HTTP API until the process is signaled to stop.
///
/// Builds the router from [`AppState`], wraps it with the JSON-error
/// mapping middleware (`middleware_layer::json_extractor`), and serves it
/// on `bind_addr`.
pub async fn start(state: Arc<AppState>, bind_addr: &str) -> AppResult<()> {
    let app = routes::router(state)
        .layer(middleware::from_fn(middleware_layer::json_extractor::json_error_mapper));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::Internal(format!("failed to bind {bind_addr}: {e}")))?;

    info!(%bind_addr, "api: listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Internal(format!("server error: {e}")))?;

    Ok(())
}
