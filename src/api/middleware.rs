use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed filter text (unterminated literal, invalid token, unknown operator)
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Bulk-mutation guard tripped or the datasource does not allow the mutation
    #[error("Policy error: {0}")]
    Policy(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// The statement reached the database and the driver reported a failure
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The resource is busy with another operation
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Parse(_) => "PARSE_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Policy(_) => "POLICY_ERROR",
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::Execution(_) => "EXECUTION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Parse(_) | AppError::Validation(_) | AppError::Execution(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Policy(_) => StatusCode::FORBIDDEN,
            AppError::Connection(_) => StatusCode::BAD_GATEWAY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let error_detail = match self {
            AppError::Policy(msg) => ErrorDetail::new(code, msg).with_details(
                "The operation was rolled back. Narrow the filters or enable bulk updates explicitly.",
            ),
            AppError::Connection(msg) => ErrorDetail::new(code, msg)
                .with_details("Check the datasource host, port and credentials."),
            AppError::Storage(msg) | AppError::Internal(msg) => {
                tracing::error!("Internal failure: {}", msg);
                ErrorDetail::new(code, "Internal server error")
            }
            AppError::Parse(msg)
            | AppError::Validation(msg)
            | AppError::Execution(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg) => ErrorDetail::new(code, msg),
        };

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

/// Convert rusqlite::Error to AppError
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Storage(format!("Invalid stored JSON: {}", err))
    }
}
