//! Common error types for statuscheck components.

use std::fmt;

/// A specialized Result type for statuscheck operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for statuscheck operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid webhook signature")]
    WebhookInvalidSignature,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification used by callers that map errors onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Internal,
}

impl Error {
    /// Create a new validation error.
    pub fn validation(msg: impl fmt::Display) -> Self {
        Error::Validation(msg.to_string())
    }

    /// Create a new not-found error.
    pub fn not_found(msg: impl fmt::Display) -> Self {
        Error::NotFound(msg.to_string())
    }

    /// Create a new conflict error.
    pub fn conflict(msg: impl fmt::Display) -> Self {
        Error::Conflict(msg.to_string())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl fmt::Display) -> Self {
        Error::Internal(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Classify this error.
    ///
    /// A bad webhook signature is a validation failure of the pushed event;
    /// configuration, IO and serialization failures are internal.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::WebhookInvalidSignature => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Internal(_) | Error::Config(_) | Error::Io(_) | Error::Serialization(_) => {
                ErrorKind::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::validation("bad").kind(), ErrorKind::Validation);
        assert_eq!(Error::WebhookInvalidSignature.kind(), ErrorKind::Validation);
        assert_eq!(Error::not_found("api").kind(), ErrorKind::NotFound);
        assert_eq!(Error::conflict("dup").kind(), ErrorKind::Conflict);
        assert_eq!(Error::internal("db").kind(), ErrorKind::Internal);

        let io = std::io::Error::other("disk");
        assert_eq!(Error::from(io).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::validation("name is required").to_string(),
            "Validation error: name is required"
        );
        assert_eq!(
            Error::WebhookInvalidSignature.to_string(),
            "Invalid webhook signature"
        );
    }
}
