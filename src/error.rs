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

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Attempt limit exceeded: {0}")]
    AttemptLimitExceeded(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Validation error: {0}")]
    PayloadValidation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Machine-readable kind included in every error body so clients can
    /// branch without parsing the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::Validation(_) | Error::PayloadValidation(_) => "validation_error",
            Error::InvalidState(_) => "invalid_state",
            Error::Unavailable(_) => "unavailable",
            Error::Conflict(_) => "conflict",
            Error::AttemptLimitExceeded(_) => "attempt_limit_exceeded",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::Json(_) => "bad_json",
            _ => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::PayloadValidation(_) | Error::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::InvalidState(_) | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Unavailable(_)
            | Error::AttemptLimitExceeded(_)
            | Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // never leak internals to the caller
            tracing::error!(error = ?self, "internal error");
            "An unexpected error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({ "error": self.kind(), "message": message }));
        (status, body).into_response()
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
