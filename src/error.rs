use crate::interview::InterviewError;
use crate::services::ai::OracleError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

const UNIQUE_VIOLATION: &str = "23505";

/// Caller-facing error, rendered as `{"error": <code>, "message": <text>}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    PaymentRequired(String),
    #[error("Forbidden")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Too many requests. Please try again later.")]
    RateLimited,
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::PaymentRequired(_) => (StatusCode::PAYMENT_REQUIRED, "payment_required"),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            AppError::Oracle(_) => (StatusCode::BAD_GATEWAY, "oracle_failed"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            AppError::Oracle(err) => {
                tracing::error!("Oracle call failed: {}", err);
                "The interviewer is unavailable right now. Please try again.".to_string()
            }
            AppError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error: code, message })).into_response()
    }
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db_err)) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

impl From<InterviewError> for AppError {
    fn from(err: InterviewError) -> Self {
        match err {
            InterviewError::Validation(msg) => AppError::Validation(msg),
            err @ InterviewError::InvalidMode(_) => AppError::Validation(err.to_string()),
            InterviewError::SessionNotFound => AppError::NotFound("Session not found".to_string()),
            InterviewError::PaymentRequired(msg) => AppError::PaymentRequired(msg),
            InterviewError::Conflict(msg) => AppError::Conflict(msg),
            InterviewError::Oracle(err) => AppError::Oracle(err),
            // a second pending turn hit the partial unique index
            InterviewError::Storage(err) if is_unique_violation(&err) => AppError::Conflict(
                "This session was updated concurrently. Reload and try again.".to_string(),
            ),
            InterviewError::Storage(err) => AppError::Internal(err),
        }
    }
}
