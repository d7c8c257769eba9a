//! Error types for the Kiln store client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the artifact store
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Store returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the store
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Local file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Local path cannot be mapped to a store path
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if the store refused to overwrite an existing artifact
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ApiError { status: 409, .. })
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let conflict = ClientError::api_error(409, "exists");
        assert!(conflict.is_conflict());
        assert!(conflict.is_client_error());
        assert!(!conflict.is_not_found());

        let missing = ClientError::api_error(404, "no such artifact");
        assert!(missing.is_not_found());

        let broken = ClientError::api_error(500, "disk full");
        assert!(broken.is_server_error());
        assert!(!broken.is_client_error());
    }
}
