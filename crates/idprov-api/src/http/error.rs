//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use idprov_core::workflow::checkpoint::CheckpointError;
use idprov_core::workflow::engine::EngineError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Engine(EngineError),
    /// Malformed request body or parameters.
    Validation(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Engine(EngineError::Checkpoint(CheckpointError::ExecutionNotFound(id))) => (
                StatusCode::NOT_FOUND,
                "EXECUTION_NOT_FOUND",
                format!("Execution {id} not found"),
            ),
            AppError::Engine(EngineError::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Engine(e) => (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR", e.to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        }
        let request_id = uuid::Uuid::now_v7().to_string();
        (status, Json(ApiResponse::error(code, &message, request_id))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_execution_is_not_found() {
        let err = AppError::from(EngineError::Checkpoint(CheckpointError::ExecutionNotFound(
            uuid::Uuid::nil(),
        )));
        let (status, code, _) = err.parts();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "EXECUTION_NOT_FOUND");
    }

    #[test]
    fn repository_failure_is_internal() {
        let err = AppError::from(EngineError::Checkpoint(CheckpointError::Repository(
            "disk full".into(),
        )));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn invalid_input_is_bad_request() {
        let err = AppError::from(EngineError::InvalidInput("not an object".into()));
        assert_eq!(err.parts().0, StatusCode::BAD_REQUEST);
    }
}
