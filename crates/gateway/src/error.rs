//! Error — maps the domain error taxonomy (and this crate's own request
//! validation failures) onto HTTP responses shaped like the provider's own
//! error envelope: `{"error": {"code": <http status>, "message": ..., "status": ...}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use emulator_core::error::Error as CoreError;

/// A single field-level validation failure, collected by `Validator`.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("request failed validation")]
    Validation(Vec<FieldError>),

    #[error("malformed request body: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: u16,
    message: String,
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a [FieldError]>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, status_str, details): (StatusCode, u16, String, &str, Option<Vec<FieldError>>) =
            match self {
                ApiError::Core(e) => {
                    let http = e.http_status();
                    let status = StatusCode::from_u16(http).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    if http == 500 {
                        tracing::error!(error = %e, code = e.code(), "internal error");
                    }
                    (status, http, e.to_string(), e.code(), None)
                }
                ApiError::Validation(errors) => {
                    (StatusCode::BAD_REQUEST, 400, "request failed validation".to_string(), "INVALID_ARGUMENT", Some(errors))
                }
                ApiError::BadRequest(msg) => {
                    (StatusCode::BAD_REQUEST, 400, msg, "INVALID_ARGUMENT", None)
                }
            };

        let body = ErrorBody { error: ErrorDetail { code, message, status: status_str, details: details.as_deref() } };
        (status, Json(body)).into_response()
    }
}
