use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::errors::Error;

/// API-boundary error, rendered as a JSON body with the matching status.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// Aggregated validation failures; serialized as an array.
    ValidationFailed(Vec<String>),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<String>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = match self {
            ApiError::BadRequest(message) => {
                ErrorBody { error: "bad_request", message, details: None }
            }
            ApiError::ValidationFailed(details) => ErrorBody {
                error: "validation_failed",
                message: format!("invalid config: {} error(s)", details.len()),
                details: Some(details),
            },
            ApiError::NotFound(message) => ErrorBody { error: "not_found", message, details: None },
            ApiError::Conflict(message) => ErrorBody { error: "conflict", message, details: None },
            ApiError::Internal(message) => {
                ErrorBody { error: "internal_error", message, details: None }
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(errs) => ApiError::ValidationFailed(errs.0),
            Error::NotFound { .. } => ApiError::NotFound(err.to_string()),
            Error::Conflict(msg) => ApiError::Conflict(msg),
            Error::Config(msg) | Error::Certs(msg) | Error::Transport(msg) | Error::Internal(msg) => {
                ApiError::Internal(msg)
            }
            Error::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}
