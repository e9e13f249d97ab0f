use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use ember::orchestrator::ChatError;
use ember::runtime::RuntimeError;

/// JSON error body with the HTTP status the error kind maps to.
#[derive(Debug)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn runtime_status(error: &RuntimeError) -> StatusCode {
    match error {
        RuntimeError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RuntimeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        RuntimeError::Inference(_) => StatusCode::BAD_GATEWAY,
        RuntimeError::RequestFailed(_) | RuntimeError::Decode(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<ChatError> for ErrorResponse {
    fn from(error: ChatError) -> Self {
        let status = match &error {
            ChatError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Runtime(e) => runtime_status(e),
        };
        Self::new(status, error.to_string())
    }
}

impl From<RuntimeError> for ErrorResponse {
    fn from(error: RuntimeError) -> Self {
        Self::new(runtime_status(&error), error.to_string())
    }
}
