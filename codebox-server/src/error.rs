//! API error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use codebox_sandbox::SandboxError;
use serde_json::json;
use thiserror::Error;

/// Failures of the file and session endpoints; both map to 500
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Error clearing files: {0}")]
    ClearFiles(#[source] SandboxError),

    #[error("Error resetting session: {0}")]
    ResetSession(#[source] SandboxError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_messages() {
        let err = ApiError::ResetSession(SandboxError::Initialization("preamble".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().starts_with("Error resetting session: "));

        let err = ApiError::ResetSession(SandboxError::SessionUnavailable);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.to_string(),
            "Error resetting session: Session worker is not running"
        );
    }
}
