//! Shared error type for the timeline service.
//!
//! Every crate in the workspace returns `ServiceResult<T>`. HTTP handlers
//! convert it to the `{detail, type}` JSON body via `ResponseError`.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn type_tag(&self) -> &'static str {
        match self {
            ServiceError::InvalidArgument(_) => "InvalidArgument",
            ServiceError::NotFound(_) => "NotFound",
            ServiceError::Unauthorized(_) => "Unauthorized",
            ServiceError::Conflict(_) => "Conflict",
            ServiceError::Unavailable(_) => "Unavailable",
            ServiceError::Internal(_) => "Internal",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
    #[serde(rename = "type")]
    type_: &'static str,
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if matches!(self, ServiceError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        HttpResponse::build(self.status_code()).json(ErrorBody {
            detail: self.to_string(),
            type_: self.type_tag(),
        })
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ServiceError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut => {
                ServiceError::Unavailable("database pool exhausted".to_string())
            }
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                ServiceError::Conflict(db_err.message().to_string())
            }
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for ServiceError {
    fn from(err: redis::RedisError) -> Self {
        ServiceError::Unavailable(format!("cache error: {err}"))
    }
}
