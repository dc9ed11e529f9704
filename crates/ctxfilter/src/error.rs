//! Error types for ctxfilter

use thiserror::Error;

/// Main error type for ctxfilter operations
#[derive(Error, Debug)]
pub enum CtxFilterError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Proxy/HTTP errors
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// Audit sink errors (never surfaced to clients)
    #[error("Audit error: {0}")]
    Audit(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CtxFilterError {
    fn from(e: serde_json::Error) -> Self {
        CtxFilterError::Serialization(e.to_string())
    }
}

/// Result type alias for ctxfilter operations
pub type Result<T> = std::result::Result<T, CtxFilterError>;
