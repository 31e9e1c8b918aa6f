//! Error types for the licensing server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Stable error kinds reported to licensing callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LicensingErrorType {
    None,
    IdentityBadFormat,
    IdentityNotFound,
    CustomerNotFound,
    JobNotFound,
    JobUploadRunning,
    JobDownloadRunning,
    JobOrphaned,
}

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Identity '{0}' is not in the correct format")]
    IdentityBadFormat(String),

    #[error("{0}")]
    IdentityNotFound(String),

    #[error("{0}")]
    CustomerNotFound(String),

    #[error("{0}")]
    JobNotFound(String),

    #[error("Job Id {0} does not have a parent customer")]
    JobOrphaned(String),

    #[error("Job Id {0} already has an upload running")]
    JobUploadRunning(String),

    #[error("Job Id {0} already has a download running")]
    JobDownloadRunning(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Mime table download failed: {0}")]
    MimeTableFetch(#[from] reqwest::Error),

    #[error("XML deserialization error: {0}")]
    XmlDeserialize(#[from] quick_xml::de::DeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Invalid storage locator: {0}")]
    InvalidLocator(String),

    #[error("S3 SDK error: {0}")]
    SdkError(String),
}

impl AppError {
    /// The licensing error kind, `None` for infrastructure failures.
    pub fn error_type(&self) -> LicensingErrorType {
        match self {
            AppError::IdentityBadFormat(_) => LicensingErrorType::IdentityBadFormat,
            AppError::IdentityNotFound(_) => LicensingErrorType::IdentityNotFound,
            AppError::CustomerNotFound(_) => LicensingErrorType::CustomerNotFound,
            AppError::JobNotFound(_) => LicensingErrorType::JobNotFound,
            AppError::JobOrphaned(_) => LicensingErrorType::JobOrphaned,
            AppError::JobUploadRunning(_) => LicensingErrorType::JobUploadRunning,
            AppError::JobDownloadRunning(_) => LicensingErrorType::JobDownloadRunning,
            _ => LicensingErrorType::None,
        }
    }

    /// First line of the message. Storage SDK errors can run to many lines.
    pub fn first_line(&self) -> String {
        let text = self.to_string();
        text.split(['\r', '\n'])
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default()
            .to_string()
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: LicensingErrorType,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.error_type();
        let (status, error_type, message) = match &self {
            AppError::IdentityBadFormat(_) => {
                (StatusCode::BAD_REQUEST, "bad_identity", self.to_string())
            }
            AppError::IdentityNotFound(msg)
            | AppError::CustomerNotFound(msg)
            | AppError::JobNotFound(msg)
            | AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::JobOrphaned(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "job_orphaned", self.to_string())
            }
            AppError::JobUploadRunning(_) | AppError::JobDownloadRunning(_) => {
                (StatusCode::CONFLICT, "transfer_running", self.to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                match e {
                    StorageError::ObjectNotFound(key) => {
                        (StatusCode::NOT_FOUND, "not_found", format!("Object not found: {}", key))
                    }
                    StorageError::ContainerNotFound(name) => (
                        StatusCode::NOT_FOUND,
                        "not_found",
                        format!("Container not found: {}", name),
                    ),
                    StorageError::InvalidLocator(_) => (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        "invalid_locator",
                        "Customer storage locator is invalid".to_string(),
                    ),
                    StorageError::SdkError(_) => (
                        StatusCode::BAD_GATEWAY,
                        "storage_error",
                        "Storage error".to_string(),
                    ),
                }
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "Database error".to_string(),
                )
            }
            AppError::MimeTableFetch(e) => {
                tracing::error!("Mime table download failed: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "mime_table_unavailable",
                    "Content type reference table is unavailable, retry later".to_string(),
                )
            }
            AppError::XmlDeserialize(e) => {
                tracing::error!("XML deserialize error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "parse_error",
                    "Failed to deserialize XML".to_string(),
                )
            }
            AppError::Json(e) => (StatusCode::BAD_REQUEST, "json_error", e.to_string()),
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "io_error",
                    "IO error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            kind,
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
