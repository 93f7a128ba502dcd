use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::jwt::SigningError;
use crate::keygen::KeygenError;

/// User-facing messages shared between handlers and tests.
pub mod msg {
    pub const LICENSE_NOT_FOUND: &str = "License not found";
    pub const PRODUCT_NOT_FOUND: &str = "Product not found";
    pub const PRODUCT_GROUP_NOT_FOUND: &str = "Product group not found";
    pub const FEATURE_NOT_FOUND: &str = "Feature not found";
    pub const RELEASE_NOT_FOUND: &str = "Release not found";
    pub const LICENSE_KEY_HEADER_REQUIRED: &str = "X-License-Key header is required";
    pub const EXPIRY_CONFLICT: &str = "Cannot specify both expires_at and duration";
    pub const LICENSE_TYPE_REQUIRED: &str = "type is required when the product has no default license type";
    pub const NAME_EMPTY: &str = "Name cannot be empty";
    pub const CODE_EMPTY: &str = "Code cannot be empty";
    pub const VERSION_EMPTY: &str = "Version cannot be empty";
    pub const SCOPE_CONFLICT: &str = "Specify at most one of product_id and product_group_id";
    pub const PRODUCT_HAS_LICENSES: &str = "Product still has licenses; purge them first";
    pub const DUPLICATE_FEATURE: &str = "A feature with this code already exists in this scope";
    pub const DUPLICATE_RELEASE: &str = "A release with this version already exists in this scope";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<KeygenError> for AppError {
    fn from(err: KeygenError) -> Self {
        match err {
            KeygenError::InvalidCharsetRange(_) | KeygenError::EmptyCharset => {
                AppError::BadRequest(format!("Invalid charset configuration: {}", err))
            }
            KeygenError::LengthTooLong(_) => AppError::BadRequest(err.to_string()),
            KeygenError::RandomSource(e) => {
                AppError::Internal(format!("Secure random source unavailable: {}", e))
            }
        }
    }
}

impl From<SigningError> for AppError {
    fn from(err: SigningError) -> Self {
        match err {
            SigningError::Verify(msg) => AppError::BadRequest(format!("Invalid token: {}", msg)),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone())),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg.clone())),
            AppError::TooManyRequests => (StatusCode::TOO_MANY_REQUESTS, "Too many requests", None),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl AppError {
    /// HTTP status this error maps to, for audit records written before the
    /// response is produced.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Converts `Option<T>` lookups into `AppError::NotFound`.
pub trait OptionExt<T> {
    fn or_not_found(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(msg.into()))
    }
}

/// True when a SQLite error is a UNIQUE/FOREIGN KEY/CHECK constraint failure.
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub type Result<T> = std::result::Result<T, AppError>;
