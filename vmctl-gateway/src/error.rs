//! Error types for the gateway crate.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use vmctl_core::ErrorBody;
use vmctl_executor::ExecutorError;

/// Errors that can occur during gateway request handling.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// An error propagated from the executor layer.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// The request body is malformed or contains invalid values.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A handler task failed unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Executor(ExecutorError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            Self::Executor(ExecutorError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Executor(ExecutorError::AlreadyExists(_) | ExecutorError::InvalidState { .. }) => {
                StatusCode::CONFLICT
            }
            Self::Executor(ExecutorError::StartTimeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            Self::Executor(ExecutorError::NetworkExhausted { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Executor(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable snake_case kind reported in the error body.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Executor(e) => e.kind(),
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "request failed");
        }
        let body = ErrorBody { error: self.to_string(), kind: self.kind().to_owned() };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmctl_core::{VmName, VmStatus};

    fn name() -> VmName {
        match VmName::new("vm1") {
            Ok(n) => n,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn gateway_error_status_codes_map_correctly() {
        let cases = [
            (GatewayError::InvalidRequest("missing field".to_owned()), StatusCode::BAD_REQUEST),
            (ExecutorError::NotFound(name()).into(), StatusCode::NOT_FOUND),
            (ExecutorError::AlreadyExists(name()).into(), StatusCode::CONFLICT),
            (
                ExecutorError::InvalidState { name: name(), status: VmStatus::Stopped, operation: "stop" }.into(),
                StatusCode::CONFLICT,
            ),
            (ExecutorError::StartTimeout("10000ms".to_owned()).into(), StatusCode::GATEWAY_TIMEOUT),
            (ExecutorError::NetworkExhausted { capacity: 4 }.into(), StatusCode::SERVICE_UNAVAILABLE),
            (ExecutorError::SpawnFailed("exec".to_owned()).into(), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let label = err.to_string();
            assert_eq!(err.into_response().status(), expected, "{label}");
        }
    }

    #[test]
    fn invalid_name_maps_to_bad_request() {
        let err = match VmName::new("bad/name") {
            Ok(_) => panic!("slash must be rejected"),
            Err(e) => GatewayError::from(ExecutorError::from(e)),
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "invalid_name");
    }

    #[tokio::test]
    async fn error_body_carries_message_and_kind() {
        let resp = GatewayError::from(ExecutorError::NotFound(name())).into_response();
        let bytes = match axum::body::to_bytes(resp.into_body(), 1024).await {
            Ok(b) => b,
            Err(e) => panic!("failed to read body: {e}"),
        };
        let body: ErrorBody = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => panic!("invalid JSON: {e}"),
        };
        assert_eq!(body.kind, "not_found");
        assert!(body.error.contains("vm1"), "message must name the VM: {}", body.error);
    }
}
