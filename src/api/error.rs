//! Uniform `{"error": "..."}` envelope for every failed request

use super::types::ErrorResponse;
use crate::db::DbError;
use crate::network::{NetworkError, NetworkErrorKind};
use crate::runtime::RuntimeError;
use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::any::Any;

const INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    Unavailable(String),
    /// Logged server-side; the client only sees a generic message
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn missing_field(field: &str) -> Self {
        AppError::BadRequest(format!("Missing required field: {field}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal server error");
                INTERNAL_MESSAGE.to_string()
            }
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::BadGateway(msg)
            | AppError::Unavailable(msg) => msg,
        };

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound { .. } => AppError::NotFound(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<RuntimeError> for AppError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::UnknownFlow(_) | RuntimeError::SessionNotFound(_) => {
                AppError::NotFound(e.to_string())
            }
            RuntimeError::Rejected(_) => AppError::Conflict(e.to_string()),
            RuntimeError::Stopped(_) => AppError::Internal(e.to_string()),
        }
    }
}

/// For gateway failures that carry no upstream response
impl From<NetworkError> for AppError {
    fn from(e: NetworkError) -> Self {
        match e.kind {
            NetworkErrorKind::NotConfigured => AppError::Unavailable(e.message),
            NetworkErrorKind::Certificate => AppError::Internal(e.message),
            _ => AppError::BadGateway(e.message),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// `Json` extractor whose rejections use the error envelope
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Response for panics caught by `CatchPanicLayer`
#[allow(clippy::needless_pass_by_value)] // Signature required by CatchPanicLayer::custom
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    AppError::Internal(format!("Handler panicked: {detail}")).into_response()
}
