//! Domain-specific error types for vortex-observer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::clients::GenerationError;

/// Main error type for the vortex-observer service
#[derive(Error, Debug)]
pub enum VortexError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Task store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<anyhow::Error> for VortexError {
    fn from(err: anyhow::Error) -> Self {
        VortexError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for VortexError {
    fn from(err: serde_json::Error) -> Self {
        VortexError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for VortexError {
    fn from(err: toml::de::Error) -> Self {
        VortexError::Config {
            message: format!("invalid TOML: {}", err),
        }
    }
}

impl From<regex::Error> for VortexError {
    fn from(err: regex::Error) -> Self {
        VortexError::Config {
            message: format!("invalid pattern: {}", err),
        }
    }
}

impl VortexError {
    fn status_and_label(&self) -> (StatusCode, &'static str) {
        match self {
            VortexError::Config { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            VortexError::Generation(_) => (StatusCode::BAD_GATEWAY, "generation_error"),
            VortexError::Store { .. } => (StatusCode::SERVICE_UNAVAILABLE, "store_error"),
            VortexError::Serialization { .. } => (StatusCode::BAD_REQUEST, "serialization_error"),
            VortexError::InvalidParams { .. } => (StatusCode::BAD_REQUEST, "invalid_params"),
            VortexError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            VortexError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

/// Convert VortexError to an HTTP response
impl IntoResponse for VortexError {
    fn into_response(self) -> Response {
        let (status, label) = self.status_and_label();
        if status.is_server_error() {
            tracing::error!("{}: {}", label, self);
        }
        (
            status,
            axum::Json(json!({
                "error": {
                    "code": label,
                    "message": self.to_string(),
                }
            })),
        )
            .into_response()
    }
}

/// Result type alias for vortex-observer operations
pub type Result<T> = std::result::Result<T, VortexError>;
