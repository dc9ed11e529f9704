//! Relay errors and their client-facing responses
//!
//! Upstream error statuses are not errors here: they are streamed back like
//! any other response. A `RelayError` means the proxy itself could not
//! produce an upstream response.

use axum::{
    body::Body,
    http::{Response, StatusCode, header},
    response::IntoResponse,
};
use thiserror::Error;

/// Errors that can occur while relaying a request
#[derive(Error, Debug, Clone)]
pub enum RelayError {
    /// Inbound request could not be read
    #[error("Request error: {0}")]
    Request(String),

    /// Network-level error (connection refused, timeout, ...)
    #[error("Network error: {0}")]
    Network(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            RelayError::Request(_) => "request",
            RelayError::Network(_) => "network",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response<Body> {
        tracing::error!(
            error_type = self.category(),
            error_message = %self,
            "Relay failed"
        );
        json_error(self.status(), &self.to_string())
    }
}

/// `{"error": message}` response with the given status
pub fn json_error(status: StatusCode, message: &str) -> Response<Body> {
    let body = serde_json::json!({ "error": message });

    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}
