//! Error types for homr-predict
//!
//! Every request failure maps to exactly one `PredictError` kind. None of them
//! are retried: recognition and I/O failures are treated as non-transient.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use homr_common::config::WeightVariant;
use std::path::PathBuf;
use thiserror::Error;

use crate::engine::EngineError;

/// Failure while making model artifacts available (fatal at startup)
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// Declared artifact is unusable as a file name
    #[error("Invalid artifact manifest entry '{name}': {reason}")]
    InvalidManifest { name: String, reason: String },

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Network failure while downloading an artifact
    #[error("Download of '{name}' from {url} failed: {message}")]
    Download {
        name: String,
        url: String,
        message: String,
    },

    /// Downloaded bytes do not match the declared digest
    #[error("Checksum mismatch for '{name}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// Engine's own weight initialization failed
    #[error("Engine provisioning of '{variant}' weights failed: {source}")]
    Engine {
        variant: WeightVariant,
        #[source]
        source: EngineError,
    },

    /// Engine provisioning task did not complete
    #[error("Engine provisioning task failed: {0}")]
    EngineTask(String),

    /// Local storage failure
    #[error("Storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisioningError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Per-request failure
#[derive(Debug, Error)]
pub enum PredictError {
    /// Request parameters rejected before any work started
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Source image unreadable or workspace setup failed
    #[error("Staging failed for {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Recognition engine reported a failure
    #[error("Recognition failed: {0}")]
    Pipeline(#[from] EngineError),

    /// Engine returned success but wrote no output
    #[error("Engine '{engine}' reported success but produced no output at {expected}")]
    OutputMissing { engine: String, expected: PathBuf },

    /// Result could not be copied to its retrievable location
    #[error("Publishing to {destination} failed: {source}")]
    Publish {
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PredictError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            PredictError::InvalidInput(_) => "INVALID_INPUT",
            PredictError::Staging { .. } => "STAGING_ERROR",
            PredictError::Pipeline(_) => "PIPELINE_ERROR",
            PredictError::OutputMissing { .. } => "OUTPUT_MISSING",
            PredictError::Publish { .. } => "PUBLISH_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            PredictError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PredictError::Staging { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PredictError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PredictError::OutputMissing { .. } => StatusCode::BAD_GATEWAY,
            PredictError::Publish { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Prediction failed
    #[error(transparent)]
    Predict(#[from] PredictError),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Predict(ref err) => (err.status(), err.code(), err.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
