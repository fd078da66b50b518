//! Error envelope shared by the assistant route handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::chat_service::ChatServiceError;

/// Error payload mapped to the `{"error": {type, code, message}}` envelope.
#[derive(Debug)]
pub(super) struct AssistApiError {
    pub(super) status: StatusCode,
    pub(super) code: &'static str,
    pub(super) message: String,
}

impl AssistApiError {
    pub(super) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub(super) fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub(super) fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "input_too_large", message)
    }

    pub(super) fn upstream_failure(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "agent_call_failed", message)
    }

    pub(super) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<ChatServiceError> for AssistApiError {
    fn from(error: ChatServiceError) -> Self {
        let message = error.to_string();
        match error {
            ChatServiceError::Agent(_) => Self::upstream_failure(message),
            ChatServiceError::Aborted(_) => {
                Self::new(StatusCode::CONFLICT, "execution_aborted", message)
            }
            ChatServiceError::Storage(_) => Self::internal(message),
            ChatServiceError::InvalidRequest(_) => Self::bad_request("invalid_request", message),
        }
    }
}

impl IntoResponse for AssistApiError {
    fn into_response(self) -> Response {
        let error_type = if self.status.is_client_error() {
            "invalid_request_error"
        } else {
            "server_error"
        };
        (
            self.status,
            Json(json!({
                "error": {
                    "type": error_type,
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}
