//! Error handling for the gateway.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use berqenas_core::{ErrorKind, MigrationError};
use serde::Serialize;
use thiserror::Error;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Engine error.
    #[error(transparent)]
    Migration(#[from] MigrationError),
    /// Bad request.
    #[error("{0}")]
    BadRequest(String),
}

/// Error response body.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Error flag.
    pub error: bool,
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Migration the error concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_id: Option<String>,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidDefinition | ErrorKind::Source => StatusCode::BAD_REQUEST,
        ErrorKind::ChecksumDrift
        | ErrorKind::EngineBusy
        | ErrorKind::DependentsStillApplied
        | ErrorKind::StateConflict
        | ErrorKind::InvalidTransition => StatusCode::CONFLICT,
        ErrorKind::UnknownDependency
        | ErrorKind::DependencyCycle
        | ErrorKind::MissingDownMigration => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, migration_id) = match self {
            AppError::Migration(err) => {
                let kind = err.kind();
                let status = status_for(kind);
                if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                }
                (
                    status,
                    kind.as_str().to_string(),
                    err.to_string(),
                    err.migration_id().map(str::to_string),
                )
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST".to_string(), msg, None)
            }
        };

        let body = ErrorResponse {
            error: true,
            code,
            message,
            migration_id,
        };

        (status, Json(body)).into_response()
    }
}
