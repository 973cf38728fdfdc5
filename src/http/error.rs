//! Handler error type.
//!
//! Handlers return `Result<_, AppError>`; the error renders its own status and
//! a JSON body. Internal detail is logged, never sent to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors a route handler may declare.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// The 500 returned for faults, with no detail attached.
    pub fn generic_internal() -> Self {
        AppError::Internal(String::new())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to clients.
    pub fn public_message(&self) -> &'static str {
        match self {
            AppError::NotFound => "not found",
            AppError::Internal(_) => "internal error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(detail) = &self {
            if !detail.is_empty() {
                tracing::error!(error.message = %detail, "handler returned internal error");
            }
        }
        let body = Json(json!({ "error": self.public_message() }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_detail_not_exposed() {
        let err = AppError::Internal("attempt to divide by zero".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "internal error");
        assert!(err.to_string().contains("divide by zero"));
    }

    #[test]
    fn test_not_found_status() {
        assert_eq!(AppError::NotFound.status(), StatusCode::NOT_FOUND);
    }
}
