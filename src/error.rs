use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures raised by a scan engine while it is being built or invoked.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("nmap program was not found: {0}")]
    NotFound(String),

    #[error("failed to start scan engine: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("scan engine exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("scan timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not parse scan engine output: {0}")]
    Parse(String),
}

/// Everything a `POST /scan` request can fail with.
///
/// The first three variants are caller mistakes and map to `400`. A request
/// that found no free worker gets `503`; engine failures map to `500` and
/// pass their message through.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("No target specified")]
    MissingTarget,

    #[error("Invalid target")]
    InvalidTarget,

    #[error("Invalid scan type")]
    InvalidScanType,

    #[error("no scan worker became free within {0:?}")]
    Busy(Duration),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ScanError {
    pub fn status(&self) -> StatusCode {
        match self {
            ScanError::MissingTarget | ScanError::InvalidTarget | ScanError::InvalidScanType => {
                StatusCode::BAD_REQUEST
            }
            ScanError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            ScanError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ScanError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "scan failed");
        } else {
            tracing::warn!(error = %self, "scan request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
