use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(
        "Unknown environment '{0}', expected one of: development, testing, production, default"
    )]
    UnknownEnvironment(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
    #[error("Metrics registry error: {0}")]
    MetricsError(#[from] prometheus::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            code,
            error: error.to_string(),
            message: message.to_string(),
        }
    }

    pub fn from_api_error(err: &ApiError) -> Self {
        match err {
            ApiError::UnknownEnvironment(_) | ApiError::ConfigurationError(_) => {
                Self::new("configuration_error", &err.to_string(), 500)
            }
            ApiError::ValidationError(_) => Self::new("validation_error", &err.to_string(), 422),
            // Registry and I/O failures are reported without their internals.
            ApiError::MetricsError(_) => {
                Self::new("metrics_error", "Failed to render metrics", 500)
            }
            ApiError::Io(_) => Self::new("internal_error", "Unexpected I/O failure", 500),
            ApiError::InternalServerError(_) => {
                Self::new("internal_error", "Internal server error", 500)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Request failed");

        let body = ErrorResponse::from_api_error(&self);
        let status = StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}
