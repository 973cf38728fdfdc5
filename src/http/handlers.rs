//! Route handlers.
//!
//! Handlers know nothing about telemetry beyond an occasional log line; the
//! observability middleware wraps them uniformly.

use crate::http::error::AppError;

pub async fn hello() -> &'static str {
    tracing::info!("request received on route /");
    "Hello, World!"
}

pub async fn healthz() -> &'static str {
    tracing::info!("request received on route /healthz");
    "OK"
}

/// Always fails with a declared internal error.
pub async fn error() -> Result<&'static str, AppError> {
    tracing::info!("request received on route /error");
    Err(AppError::Internal("simulated failure: division by zero".into()))
}

pub async fn not_found() -> AppError {
    AppError::NotFound
}
