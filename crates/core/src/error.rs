//! Error — the domain error taxonomy shared by every service in this crate.
//!
//! Repositories and drivers return narrow, specific errors; services translate
//! them into this taxonomy; the gateway maps the taxonomy to HTTP responses.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable string code used in the wire error body and in log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::PreconditionFailed(_) => "PRECONDITION_FAILED",
            Error::PermissionDenied(_) => "PERMISSION_DENIED",
            Error::Unauthenticated(_) => "UNAUTHENTICATED",
            Error::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            Error::FailedPrecondition(_) => "FAILED_PRECONDITION",
            Error::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status code this error maps to.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidArgument(_) => 400,
            Error::NotFound(_) => 404,
            Error::AlreadyExists(_) => 409,
            Error::PreconditionFailed(_) => 412,
            Error::PermissionDenied(_) => 403,
            Error::Unauthenticated(_) => 401,
            Error::ResourceExhausted(_) => 429,
            Error::FailedPrecondition(_) => 400,
            Error::Internal(_) => 500,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".into()),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<crate::driver::DriverError> for Error {
    fn from(e: crate::driver::DriverError) -> Self {
        match e {
            crate::driver::DriverError::ContainerNotFound(id) => {
                Error::NotFound(format!("container {id} not found"))
            }
            crate::driver::DriverError::Timeout(op) => {
                Error::Internal(format!("container operation timed out: {op}"))
            }
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
