//! # Error Handling
//!
//! HTTP-facing error type. Handlers return `Result<HttpResponse, AppError>`
//! and actix turns the error into a JSON body through [`ResponseError`].
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "not_found",
//!     "message": "Unknown action: wave",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```
//!
//! ## Where Errors Come From:
//! - **NotFound**: unknown named action, or an audio endpoint for a channel
//!   with no detector ([`RegistryError`] converts straight into it)
//! - **ValidationError**: an override body that parsed but names a blank asset
//! - **Unavailable**: any command or new audio stream after stop was requested
//!
//! Startup failures stay `anyhow::Error` and end the process in `main`.
//! Background tasks don't use this type either: the arbiter and the
//! detectors log their failures and carry on.

use crate::attention::registry::RegistryError; // Detector lookup failures
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError}; // Converts errors into HTTP responses
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Unknown action or channel (404)
    NotFound(String),

    /// Request parsed but failed validation (400)
    ValidationError(String),

    /// Server is shutting down (503)
    Unavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl AppError {
    /// Status code, machine-readable type and client-facing message.
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.as_str()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.as_str()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg.as_str()),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// A channel without a detector is just an unknown resource to the client.
impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        AppError::NotFound(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn test_error_body_shape() {
        let response = AppError::NotFound("Unknown action: wave".to_string()).error_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["type"], "not_found");
        assert_eq!(value["error"]["message"], "Unknown action: wave");
        assert!(value["error"]["timestamp"].is_string());
    }

    #[test]
    fn test_status_mapping() {
        let missing = AppError::from(RegistryError { channel: 4 });
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(missing.to_string(), "Not found: Channel 4 is not registered");
        assert_eq!(
            AppError::ValidationError("icon name must not be blank".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unavailable("stopping".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
