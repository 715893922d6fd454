//! Error types for Lexplain services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for each failing phase (validation, auth, process, store)
//! - HTTP status code mapping
//! - Structured `{success, message, error}` responses
//! - Error codes for client handling

use axum::{
    extract::{multipart::MultipartRejection, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingInput,
    PayloadTooLarge,

    // Authentication errors (2xxx)
    MissingCredential,
    InvalidCredential,

    // Resource errors (4xxx)
    ScriptNotFound,

    // Store errors (7xxx)
    StoreError,
    DatabaseError,
    StatusUpdateFailed,

    // Process errors (8xxx)
    ProcessFailed,
    SpawnFailed,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingInput => 1002,
            ErrorCode::PayloadTooLarge => 1003,

            ErrorCode::MissingCredential => 2001,
            ErrorCode::InvalidCredential => 2002,

            ErrorCode::ScriptNotFound => 4001,

            ErrorCode::StoreError => 7001,
            ErrorCode::DatabaseError => 7002,
            ErrorCode::StatusUpdateFailed => 7003,

            ErrorCode::ProcessFailed => 8001,
            ErrorCode::SpawnFailed => 8002,
            ErrorCode::UpstreamError => 8003,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
///
/// The `Display` text of each variant is what clients see; the fields carry
/// the detail that is logged but never rendered.
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("{message}")]
    MissingInput { message: String },

    #[error("Payload too large: exceeds limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    // Authentication errors
    #[error("Missing Bearer token")]
    MissingCredential,

    #[error("Invalid or expired token")]
    InvalidCredential { reason: String },

    // Simplifier errors
    #[error("Simplifier script not found")]
    ScriptNotFound { path: String },

    #[error("Failed to start simplifier")]
    SpawnFailed { message: String },

    #[error("Simplification failed")]
    ProcessFailed {
        exit_code: Option<i32>,
        detail: String,
    },

    // Store errors
    #[error("Failed to update document status")]
    StatusUpdate { message: String },

    #[error("Failed to upload document")]
    Upload { message: String },

    #[error("Document store error")]
    Store { store: String, message: String },

    #[error("Database error")]
    Database(#[from] sea_orm::DbErr),

    #[error("Upstream service error")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error")]
    Internal { message: String },

    #[error("Configuration error")]
    Configuration { message: String },

    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal server error")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a 400 on missing input
    pub fn missing_input(message: impl Into<String>) -> Self {
        AppError::MissingInput {
            message: message.into(),
        }
    }

    /// Shorthand for a store failure
    pub fn store(store: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Store {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingInput { .. } => ErrorCode::MissingInput,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::MissingCredential => ErrorCode::MissingCredential,
            AppError::InvalidCredential { .. } => ErrorCode::InvalidCredential,
            AppError::ScriptNotFound { .. } => ErrorCode::ScriptNotFound,
            AppError::SpawnFailed { .. } => ErrorCode::SpawnFailed,
            AppError::ProcessFailed { .. } => ErrorCode::ProcessFailed,
            AppError::StatusUpdate { .. } => ErrorCode::StatusUpdateFailed,
            AppError::Upload { .. } => ErrorCode::StoreError,
            AppError::Store { .. } => ErrorCode::StoreError,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } |
            AppError::MissingInput { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::MissingCredential |
            AppError::InvalidCredential { .. } => StatusCode::UNAUTHORIZED,

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 500 Internal Server Error
            AppError::ScriptNotFound { .. } |
            AppError::SpawnFailed { .. } |
            AppError::ProcessFailed { .. } |
            AppError::StatusUpdate { .. } |
            AppError::Upload { .. } |
            AppError::Store { .. } |
            AppError::Database(_) |
            AppError::HttpClient(_) |
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Diagnostic text safe to return alongside the message
    pub fn client_detail(&self) -> Option<&str> {
        match self {
            AppError::ProcessFailed { detail, .. } => Some(detail.as_str()),
            _ => None,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity; the Debug form carries the internal detail
        if self.is_server_error() {
            tracing::error!(
                error = ?self,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            success: false,
            code,
            message,
            error: self.client_detail().map(String::from),
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string()
        }
    }
}

/// Malformed JSON bodies become a 400 without echoing parser output
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(rejection = %rejection.body_text(), "Rejected JSON body");
        AppError::Validation {
            message: "Invalid JSON body".to_string(),
            field: None,
        }
    }
}

/// A body that is not multipart carries no file
impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        tracing::debug!(rejection = %rejection.body_text(), "Rejected multipart body");
        AppError::Validation {
            message: "No file uploaded".to_string(),
            field: Some("file".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::ScriptNotFound { path: "scripts/x.py".into() };
        assert_eq!(err.code(), ErrorCode::ScriptNotFound);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Simplifier script not found");
    }

    #[test]
    fn test_missing_input_is_client_error() {
        let err = AppError::missing_input("Provide filePath or text");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "Provide filePath or text");
    }

    #[test]
    fn test_auth_errors() {
        assert_eq!(AppError::MissingCredential.status_code(), StatusCode::UNAUTHORIZED);
        let err = AppError::InvalidCredential { reason: "bad signature".into() };
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "Invalid or expired token");
    }

    #[test]
    fn test_process_failure_exposes_detail() {
        let err = AppError::ProcessFailed {
            exit_code: Some(2),
            detail: "bad input".into(),
        };
        assert_eq!(err.client_detail(), Some("bad input"));
        assert_eq!(err.code().as_code(), 8001);
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let err: AppError = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire").into();
        assert_eq!(err.to_string(), "Internal server error");
        assert!(err.client_detail().is_none());
    }

    #[test]
    fn test_status_update_distinct_from_process_failure() {
        let update = AppError::StatusUpdate { message: "timeout".into() };
        let process = AppError::ProcessFailed { exit_code: Some(1), detail: String::new() };
        assert_ne!(update.code(), process.code());
        assert_eq!(update.to_string(), "Failed to update document status");
    }

    #[test]
    fn test_configuration_detail_is_hidden() {
        let err = AppError::Configuration {
            message: "auth.jwt_secret is required for shared_secret mode".into(),
        };
        assert_eq!(err.to_string(), "Configuration error");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.client_detail().is_none());
    }
}
