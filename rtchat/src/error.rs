//! Error types.

use thiserror::Error;

/// The main error type for rtchat operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A backend collaborator (persistence, realtime, identity) failed.
    #[error("Transient network error: {0}")]
    Transient(String),

    /// Input or payload failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation requires an authenticated user but none was available.
    #[error("Authentication required")]
    AuthRequired,

    /// A conversation or user lookup came back empty.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local key-value storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The component has been torn down.
    #[error("Component closed")]
    Closed,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a transient error.
    pub fn transient(msg: impl Into<String>) -> Self {
        Error::Transient(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// Check if the user may retry the action that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Check if this is an authentication error.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::AuthRequired)
    }
}

/// Result type alias for rtchat operations.
pub type Result<T> = std::result::Result<T, Error>;
