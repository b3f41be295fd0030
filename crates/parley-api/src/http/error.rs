//! Application error type mapping to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use parley_core::dispatcher::DispatchError;
use parley_types::error::StoreError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// The dispatch pipeline failed.
    Dispatch(DispatchError),
    /// Unknown channel or resource.
    NotFound(String),
    /// Bearer token missing or wrong.
    Unauthorized(String),
    /// Malformed request body.
    Validation(String),
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        AppError::Dispatch(e)
    }
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Dispatch(DispatchError::Store {
                source: StoreError::BackendUnavailable(_),
                ..
            }) => (StatusCode::SERVICE_UNAVAILABLE, "BACKEND_UNAVAILABLE"),
            AppError::Dispatch(DispatchError::Timeout { .. }) => {
                (StatusCode::GATEWAY_TIMEOUT, "HANDLER_TIMEOUT")
            }
            AppError::Dispatch(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DISPATCH_ERROR"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match self {
            AppError::Dispatch(e) => e.to_string(),
            AppError::NotFound(msg) | AppError::Unauthorized(msg) | AppError::Validation(msg) => msg,
        };

        if status.is_server_error() {
            tracing::error!(%code, %message, "request failed");
        }

        let body = json!({
            "meta": {
                "timestamp": chrono::Utc::now().to_rfc3339(),
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
