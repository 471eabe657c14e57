//! Domain error types for the defect analyzer.
//!
//! Uses thiserror for ergonomic error handling with automatic Display implementations.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use std::fmt;

/// Application-level errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The image failed one or more validation checks
    #[error("Image validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Out-of-band setup is missing (credentials, stage)
    #[error("{message}")]
    Setup {
        message: String,
        remediation: Option<String>,
    },

    /// Blob storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Warehouse statement or session failed
    #[error("Warehouse error: {message}")]
    Warehouse {
        message: String,
        /// Error code reported by the warehouse for a failed statement
        code: Option<String>,
    },

    /// The analysis query matched no staged file
    #[error("No result returned from warehouse for {0}")]
    NoResult(String),

    /// The analysis row was present but carried no payload
    #[error("Warehouse returned empty result for {0}")]
    EmptyResult(String),

    /// Resource not found
    #[error("{0} not found")]
    NotFound(String),

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Upload exceeded the request size limit
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
}

impl AppError {
    /// Setup error with a remediation hint shown to the caller.
    pub fn setup(message: impl Into<String>, remediation: impl Into<String>) -> Self {
        AppError::Setup {
            message: message.into(),
            remediation: Some(remediation.into()),
        }
    }

    /// Warehouse failure without a warehouse error code (transport, protocol).
    pub fn warehouse(message: impl Into<String>) -> Self {
        AppError::Warehouse {
            message: message.into(),
            code: None,
        }
    }

    /// Machine-readable error code used in response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::Setup { .. } => "SETUP_REQUIRED",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Warehouse { .. } => "WAREHOUSE_ERROR",
            AppError::NoResult(_) => "NO_RESULT",
            AppError::EmptyResult(_) => "EMPTY_RESULT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Setup { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Storage(_)
            | AppError::Warehouse { .. }
            | AppError::NoResult(_)
            | AppError::EmptyResult(_) => StatusCode::BAD_GATEWAY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AppError::Validation(violations) => ErrorResponse {
                error: self.code().to_string(),
                message: "The image does not meet the selected model's requirements".to_string(),
                details: violations.clone(),
                remediation: None,
            },
            AppError::Setup {
                message,
                remediation,
            } => {
                tracing::error!("Setup error: {}", message);
                ErrorResponse {
                    error: self.code().to_string(),
                    message: message.clone(),
                    details: Vec::new(),
                    remediation: remediation.clone(),
                }
            }
            _ => ErrorResponse::new(self.code(), self.to_string()),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Error response body matching OpenAPI schema.
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// Individual violations (validation failures only)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    /// Steps that resolve a setup error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            details: Vec::new(),
            remediation: None,
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

// Conversion implementations for common error types

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}
