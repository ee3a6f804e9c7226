use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("A settlement run is already in progress")]
    RunInProgress,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors returned by the external card-processor gateway.
///
/// The split between retryable and non-retryable variants is the contract
/// the settlement executor's retry policy is built on: a retryable error is
/// safe to re-send under the same idempotency key, a non-retryable one is a
/// terminal outcome for the attempt.
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Processor rate limit hit")]
    RateLimited,

    #[error("Processor unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Network error reaching processor: {0}")]
    Network(String),

    #[error("Processor request timed out")]
    Timeout,

    #[error("Insufficient funds available at the processor")]
    InsufficientFunds,

    #[error("Invalid or deactivated destination account: {0}")]
    InvalidDestination(String),

    #[error("Processor authentication failed")]
    AuthenticationFailed,

    #[error("Transfers are disabled for this account")]
    TransfersDisabled,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Processor error {code}: {message}")]
    Api { code: String, message: String },
}

impl ProcessorError {
    /// Whether a retry under the same idempotency key can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProcessorError::RateLimited
                | ProcessorError::ServiceUnavailable(_)
                | ProcessorError::Network(_)
                | ProcessorError::Timeout
        )
    }

    /// Stable machine-readable code, preserved in the audit record.
    pub fn code(&self) -> &str {
        match self {
            ProcessorError::RateLimited => "rate_limited",
            ProcessorError::ServiceUnavailable(_) => "service_unavailable",
            ProcessorError::Network(_) => "network_error",
            ProcessorError::Timeout => "timeout",
            ProcessorError::InsufficientFunds => "insufficient_funds",
            ProcessorError::InvalidDestination(_) => "invalid_destination",
            ProcessorError::AuthenticationFailed => "authentication_failed",
            ProcessorError::TransfersDisabled => "transfers_disabled",
            ProcessorError::InvalidAmount(_) => "invalid_amount",
            ProcessorError::Api { code, .. } => code.as_str(),
        }
    }
}

impl From<reqwest::Error> for ProcessorError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ProcessorError::Timeout
        } else if error.is_connect() {
            ProcessorError::Network(format!("connection failed: {}", error))
        } else {
            ProcessorError::Network(error.to_string())
        }
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::RunInProgress => (
                StatusCode::CONFLICT,
                "SETTLEMENT_IN_PROGRESS",
                "A settlement run is already in progress".to_string(),
                None,
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg, None),
            AppError::Processor(ref e) if e.is_retryable() => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PROCESSOR_UNAVAILABLE",
                "The payment processor is temporarily unavailable".to_string(),
                Some(serde_json::json!({ "processor_code": e.code() })),
            ),
            AppError::Processor(e) => (
                StatusCode::BAD_GATEWAY,
                "PROCESSOR_ERROR",
                "The payment processor rejected the request".to_string(),
                Some(serde_json::json!({ "processor_code": e.code() })),
            ),
            AppError::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                format!("Configuration error: {}", msg),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
