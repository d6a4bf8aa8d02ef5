//! Application-wide error types and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::models::PaymentStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition for {entity} {id}: {current} -> {requested}")]
    InvalidStateTransition {
        entity: &'static str,
        id: String,
        current: String,
        requested: String,
    },

    #[error("Provider verification failed: {0}")]
    ProviderVerificationFailed(String),

    #[error("Concurrent write detected: {0}")]
    PersistenceConflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Unauthorized")]
    Unauthorized,
}

impl AppError {
    pub fn donation_transition(id: &str, current: PaymentStatus, requested: PaymentStatus) -> Self {
        AppError::InvalidStateTransition {
            entity: "donation",
            id: id.to_string(),
            current: current.as_str().to_string(),
            requested: requested.as_str().to_string(),
        }
    }
}

/// SQLite reports lock contention as `SQLITE_BUSY` (5) or `SQLITE_LOCKED` (6);
/// extended codes keep the primary code in the low byte.
impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            let primary = db_err
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| c & 0xff);
            if matches!(primary, Some(5) | Some(6)) {
                return AppError::PersistenceConflict(db_err.message().to_string());
            }
        }
        AppError::Database(e)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let codes: Vec<String> = errs.iter().map(|e| e.code.to_string()).collect();
                format!("{field}: {}", codes.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");
        AppError::Validation(message)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
            AppError::InvalidStateTransition {
                entity,
                id,
                current,
                requested,
            } => (
                StatusCode::CONFLICT,
                "INVALID_STATE_TRANSITION",
                Some(serde_json::json!({
                    "entity": entity,
                    "id": id,
                    "current_status": current,
                    "requested_status": requested,
                })),
            ),
            AppError::ProviderVerificationFailed(_) => {
                (StatusCode::BAD_REQUEST, "PROVIDER_VERIFICATION_FAILED", None)
            }
            AppError::PersistenceConflict(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "PERSISTENCE_CONFLICT", None)
            }
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", None),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT", None),
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "INVALID_JSON", None),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", None),
            AppError::Provider(_) | AppError::Http(_) => {
                (StatusCode::BAD_GATEWAY, "PAYMENT_PROVIDER_ERROR", None)
            }
            AppError::Database(_)
            | AppError::Migrate(_)
            | AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None),
        };

        // Internal failures are logged in full but never echoed to the caller.
        let message = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!("request failed: {self}");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code,
            details,
        });

        (status, body).into_response()
    }
}
