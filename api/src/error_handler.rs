use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::core::http::response_envelope::ApiResponse;

/// Public application error type: maps the review-core/reliability/provider
/// error taxonomy onto the HTTP status codes in §6/§7.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("duplicate request already in progress")]
    Conflict,

    #[error("rate limited")]
    RateLimited { retry_after_secs: u64 },

    #[error("service unavailable")]
    ServiceUnavailable { retry_after_secs: Option<u64> },

    #[error("gateway timeout")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Conflict => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::NotFound => "NOT_FOUND",
            AppError::Conflict => "CONFLICT",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            AppError::Timeout => "GATEWAY_TIMEOUT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AppError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            AppError::ServiceUnavailable { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after_secs();
        let body = ErrorBody {
            error: self.error_code(),
            message: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Handy result alias used across handlers.
pub type AppResult<T> = Result<T, AppError>;

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(err: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<axum::extract::rejection::QueryRejection> for AppError {
    fn from(err: axum::extract::rejection::QueryRejection) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// Maps the review domain's root error onto §7's taxonomy.
impl From<review_core::errors::Error> for AppError {
    fn from(err: review_core::errors::Error) -> Self {
        use review_core::errors::{Error as E, ProviderError as P};

        match err {
            E::Validation(msg) => AppError::BadRequest(msg),
            E::Provider(P::Unauthorized) => AppError::Unauthorized,
            E::Provider(P::Forbidden) => AppError::Forbidden,
            E::Provider(P::NotFound) => AppError::NotFound,
            E::Provider(P::RateLimited { retry_after_secs }) => AppError::ServiceUnavailable { retry_after_secs },
            E::Provider(P::Timeout) => AppError::Timeout,
            E::Provider(other) => AppError::Internal(other.to_string()),
            E::Reliability(reliability::ReliabilityError::BreakerOpen { retry_after_secs, .. }) => {
                AppError::ServiceUnavailable { retry_after_secs: Some(retry_after_secs) }
            }
            E::Reliability(reliability::ReliabilityError::RateLimited { retry_after_secs }) => {
                AppError::RateLimited { retry_after_secs }
            }
            E::Reliability(reliability::ReliabilityError::AlreadyPending(_)) => AppError::Conflict,
            E::Reliability(other) => AppError::Internal(other.to_string()),
            E::Store(e) => AppError::Internal(e.to_string()),
            E::Ai(e) => AppError::Internal(e.to_string()),
            E::Other(msg) if msg.contains("timed out") => AppError::Timeout,
            E::Other(msg) if msg.contains("service_unavailable") => AppError::ServiceUnavailable { retry_after_secs: None },
            E::Other(msg) => AppError::Internal(msg),
        }
    }
}

/// Renders an [`AppError`] through [`ApiResponse`]'s envelope rather than
/// the bare `{error, message}` body, for handlers that build responses
/// manually instead of returning `AppResult<impl IntoResponse>`.
pub fn to_api_response(err: &AppError) -> Response {
    let resp: ApiResponse<()> = ApiResponse::error(err.error_code(), err.to_string(), Vec::new());
    resp.into_response_with_status(err.status_code())
}
