use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use zapgate_engine::EngineError;

/// Wire envelope shared by every endpoint: `{ success, result?, error? }`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// Successful reply with a `200` status.
pub fn ok<T: Serialize>(result: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        result: Some(result),
        error: None,
    })
}

/// An engine failure mapped onto an HTTP status and a stable string code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let (status, code) = match &err {
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            EngineError::AlreadyActive(_) => (StatusCode::CONFLICT, "ALREADY_ACTIVE"),
            EngineError::NotConnected(_) => (StatusCode::CONFLICT, "NOT_CONNECTED"),
            EngineError::AlreadyLoggedIn(_) => (StatusCode::CONFLICT, "ALREADY_LOGGED_IN"),
            EngineError::NameTaken(_) => (StatusCode::CONFLICT, "NAME_TAKEN"),
            EngineError::InvalidTransition(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
            EngineError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            EngineError::InvalidProxy(_) => (StatusCode::BAD_REQUEST, "INVALID_PROXY"),
            EngineError::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
            EngineError::DeviceAllocation(_) | EngineError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        Self::new(status, code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            result: None,
            error: Some(ApiErrorBody {
                code: self.code,
                message: self.message,
            }),
        };
        (self.status, Json(body)).into_response()
    }
}
