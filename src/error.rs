use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;
use tracing::error;

use crate::service::validation::ValidationError;

#[derive(Debug, ThisError)]
pub enum PortalError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{kind} '{key}' already exists with different attributes")]
    AlreadyExists { kind: &'static str, key: String },

    #[error("{kind} '{key}' was modified concurrently")]
    RevisionConflict { kind: &'static str, key: String },

    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} '{key}' is protected and cannot be modified")]
    Protected { kind: &'static str, key: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("invalid or missing admin key")]
    Unauthorized,

    #[error("request body exceeds the configured limit")]
    PayloadTooLarge,

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PortalError {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        PortalError::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn already_exists(kind: &'static str, key: impl Into<String>) -> Self {
        PortalError::AlreadyExists {
            kind,
            key: key.into(),
        }
    }

    pub fn conflict(kind: &'static str, key: impl Into<String>) -> Self {
        PortalError::RevisionConflict {
            kind,
            key: key.into(),
        }
    }

    pub fn protected(kind: &'static str, key: impl Into<String>) -> Self {
        PortalError::Protected {
            kind,
            key: key.into(),
        }
    }
}

impl From<figment::Error> for PortalError {
    fn from(e: figment::Error) -> Self {
        PortalError::Config(Box::new(e))
    }
}

/// Decides whether a failed store call may be attempted again.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for PortalError {
    fn is_retryable(&self) -> bool {
        match self {
            PortalError::StoreUnavailable(_) => true,
            PortalError::DatabaseError(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl IsRetryable for SqlxError {
    fn is_retryable(&self) -> bool {
        match self {
            SqlxError::PoolTimedOut | SqlxError::Io(_) | SqlxError::WorkerCrashed => true,
            // SQLITE_BUSY / SQLITE_LOCKED and their extended codes.
            SqlxError::Database(db) => matches!(
                db.code().as_deref(),
                Some("5" | "6" | "261" | "262" | "517")
            ),
            _ => false,
        }
    }
}

impl IntoResponse for PortalError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match &self {
            PortalError::Validation(v) => (
                StatusCode::BAD_REQUEST,
                ApiErrorBody::new("VALIDATION_ERROR", v.to_string()).with_field(&v.field),
            ),
            PortalError::AlreadyExists { .. } => (
                StatusCode::CONFLICT,
                ApiErrorBody::new("ALREADY_EXISTS", self.to_string()),
            ),
            PortalError::RevisionConflict { .. } => (
                StatusCode::CONFLICT,
                ApiErrorBody::new("REVISION_CONFLICT", self.to_string()),
            ),
            PortalError::NotFound { .. } => (
                StatusCode::NOT_FOUND,
                ApiErrorBody::new("NOT_FOUND", self.to_string()),
            ),
            PortalError::Protected { .. } => (
                StatusCode::FORBIDDEN,
                ApiErrorBody::new("PROTECTED_RESOURCE", self.to_string()),
            ),
            PortalError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ApiErrorBody::new("UNAUTHORIZED", self.to_string()),
            ),
            PortalError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ApiErrorBody::new("PAYLOAD_TOO_LARGE", self.to_string()),
            ),
            e if e.is_retryable() => {
                error!(error = %e, "store unavailable after retries");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiErrorBody::new(
                        "STORE_UNAVAILABLE",
                        "The resource store is temporarily unavailable.",
                    ),
                )
            }
            e => {
                error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorBody::new("INTERNAL_ERROR", "An internal server error occurred."),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Error envelope returned by every endpoint: `{code, field?, message}`.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl ApiErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            field: None,
            message: message.into(),
        }
    }

    pub fn with_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }
}
