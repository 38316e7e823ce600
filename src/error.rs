use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Exam is not published")]
    NotPublished,

    #[error("Student is not enrolled in any batch of this exam")]
    NotEnrolled,

    #[error("Exam starts in {minutes_until_start} minute(s)")]
    NotStarted { minutes_until_start: i64 },

    #[error("Exam window has closed")]
    WindowClosed,

    #[error("Another browser session is already active for this attempt")]
    ConcurrentSession,

    #[error("Maximum number of attempts ({max_attempts}) reached")]
    AttemptLimit { max_attempts: i32 },

    #[error("Submission has already been submitted")]
    AlreadySubmitted,

    #[error("Submission is late by policy ({elapsed_minutes} minute(s) elapsed)")]
    LateSubmission { elapsed_minutes: i64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code sent as the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "configuration_error",
            Error::BadRequest(_) => "bad_request",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::NotPublished => "exam_not_published",
            Error::NotEnrolled => "not_enrolled",
            Error::NotStarted { .. } => "exam_not_started",
            Error::WindowClosed => "exam_window_closed",
            Error::ConcurrentSession => "concurrent_session",
            Error::AttemptLimit { .. } => "attempt_limit_reached",
            Error::AlreadySubmitted => "already_submitted",
            Error::LateSubmission { .. } => "late_submission",
            Error::Conflict(_) => "conflict",
            Error::Database(_) => "database_error",
            Error::Validation(_) => "validation_error",
            Error::Json(_) => "invalid_json",
            Error::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) | Error::Validation(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_)
            | Error::NotPublished
            | Error::NotEnrolled
            | Error::NotStarted { .. }
            | Error::WindowClosed => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ConcurrentSession
            | Error::AttemptLimit { .. }
            | Error::AlreadySubmitted
            | Error::LateSubmission { .. }
            | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Config(_) | Error::Database(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Timing errors are for the current window only; the caller can wait and retry.
    pub fn is_timing(&self) -> bool {
        matches!(self, Error::NotStarted { .. } | Error::WindowClosed)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match &self {
            Error::Database(err) => {
                tracing::error!(error = ?err, "Database error");
                "An unexpected error occurred".to_string()
            }
            Error::Internal(msg) | Error::Config(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An unexpected error occurred".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({ "error": self.code(), "message": message });
        match &self {
            Error::NotStarted { minutes_until_start } => {
                body["minutes_until_start"] = json!(minutes_until_start);
            }
            Error::AttemptLimit { max_attempts } => {
                body["max_attempts"] = json!(max_attempts);
            }
            Error::LateSubmission { elapsed_minutes } => {
                body["elapsed_minutes"] = json!(elapsed_minutes);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}
