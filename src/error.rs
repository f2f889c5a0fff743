use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

/// Every failure leaving the booking core. The first field is the stable
/// machine-readable code, the second a message meant for the caller.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}: {1}")]
    Unauthorized(&'static str, String),
    #[error("{0}: {1}")]
    Forbidden(&'static str, String),
    #[error("{0}: {1}")]
    BadRequest(&'static str, String),
    #[error("{0}: {1}")]
    NotFound(&'static str, String),
    #[error("{0}: {1}")]
    Conflict(&'static str, String),
    #[error("{0}: {1}")]
    Unprocessable(&'static str, String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden("FORBIDDEN", message.into())
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound("NOT_FOUND", format!("{what} not found"))
    }

    pub fn schedule_full() -> Self {
        ApiError::Conflict("SCHEDULE_FULL", "schedule is full".into())
    }

    pub fn invalid_amount(message: impl Into<String>) -> Self {
        ApiError::Unprocessable("INVALID_AMOUNT", message.into())
    }

    pub fn db(e: impl std::fmt::Display) -> Self {
        ApiError::Internal(format!("db error: {e}"))
    }

    /// Stable code as serialized in the response body.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(code, _)
            | ApiError::Forbidden(code, _)
            | ApiError::BadRequest(code, _)
            | ApiError::NotFound(code, _)
            | ApiError::Conflict(code, _)
            | ApiError::Unprocessable(code, _) => code,
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Unauthorized(_, msg)
            | ApiError::Forbidden(_, msg)
            | ApiError::BadRequest(_, msg)
            | ApiError::NotFound(_, msg)
            | ApiError::Conflict(_, msg)
            | ApiError::Unprocessable(_, msg)
            | ApiError::Internal(msg) => msg,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(..) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(..) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(..) => StatusCode::NOT_FOUND,
            ApiError::Conflict(..) => StatusCode::CONFLICT,
            ApiError::Unprocessable(..) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(msg) = &self {
            tracing::error!(error = %msg, "request failed");
        }
        let status = self.status();
        (status, ApiError::to_error_response(self.code(), self.message())).into_response()
    }
}
