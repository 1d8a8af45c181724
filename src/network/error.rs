//! Payment network error types

use serde_json::Value;
use thiserror::Error;

/// Network error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct NetworkError {
    pub kind: NetworkErrorKind,
    pub message: String,
    /// Upstream HTTP status, when a response was received
    pub status: Option<u16>,
    /// Upstream response body, when a response was received
    pub body: Option<Value>,
}

impl NetworkError {
    pub fn new(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            body: None,
        }
    }

    /// Classify a non-success HTTP response
    pub fn from_status(status: u16, body: Value) -> Self {
        let kind = match status {
            401 | 403 => NetworkErrorKind::Auth,
            404 => NetworkErrorKind::NotFound,
            408 => NetworkErrorKind::Timeout,
            400..=499 => NetworkErrorKind::InvalidRequest,
            500..=599 => NetworkErrorKind::ServerError,
            _ => NetworkErrorKind::Unknown,
        };
        let message = match upstream_message(&body) {
            Some(detail) => format!("Payment network returned {status}: {detail}"),
            None => format!("Payment network returned {status}"),
        };
        Self {
            kind,
            message,
            status: Some(status),
            body: Some(body),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(NetworkErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(NetworkErrorKind::Timeout, message)
    }

    pub fn not_configured() -> Self {
        Self::new(
            NetworkErrorKind::NotConfigured,
            "Payment network is not configured",
        )
    }

    pub fn certificate(message: impl Into<String>) -> Self {
        Self::new(NetworkErrorKind::Certificate, message)
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(format!("Request timed out: {err}"))
        } else if err.is_builder() {
            Self::new(NetworkErrorKind::InvalidRequest, format!("Invalid request: {err}"))
        } else {
            Self::network(format!("Request failed: {err}"))
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Connection, DNS or TLS failures
    Network,
    Timeout,
    /// Rejected credentials (401, 403)
    Auth,
    NotFound,
    /// Other 4xx responses
    InvalidRequest,
    /// 5xx responses
    ServerError,
    /// Gateway credentials are missing
    NotConfigured,
    /// Client certificate material could not be loaded
    Certificate,
    Unknown,
}

impl NetworkErrorKind {
    /// Whether a manual retry has a chance of succeeding unchanged
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::ServerError)
    }
}

/// Pull a human readable message out of a typical error payload
fn upstream_message(body: &Value) -> Option<String> {
    ["/error_message", "/message", "/error/message", "/error"]
        .iter()
        .find_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
        .map(String::from)
}
