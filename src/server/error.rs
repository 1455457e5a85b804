//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<T, AppError>` and use `?` on
//! [`clipcast_common::Error`].

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use clipcast_common::Error;
use serde_json::json;

/// Seconds clients are told to wait before retrying a 503.
pub const RETRY_AFTER_SECS: u64 = 5;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: Error,
}

impl AppError {
    pub fn new(inner: Error) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Error {
        &self.inner
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self::new(e)
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self::new(Error::from(e))
    }
}

fn error_code(error: &Error) -> &'static str {
    match error {
        Error::NotFound { .. } => "not_found",
        Error::InvalidRequest(_) => "invalid_request",
        Error::Conflict(_) => "conflict",
        Error::Unauthorized(_) => "unauthorized",
        Error::NotReady(_) => "not_ready",
        Error::CacheMiss { .. } => "cache_miss",
        Error::Probe(_) => "probe_error",
        Error::Encode(_) => "encode_error",
        Error::Io { .. } => "io_error",
        Error::Internal(_) => "internal_error",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() && !self.inner.is_retryable() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in streaming handler"
            );
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": error_code(&self.inner),
        });

        if self.inner.is_retryable() {
            (
                status,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
                axum::Json(body),
            )
                .into_response()
        } else {
            (status, axum::Json(body)).into_response()
        }
    }
}
