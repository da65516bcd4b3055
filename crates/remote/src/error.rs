//! Error types for the story service client.

use storyloom_core::service::ServiceError;
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Errors that can occur while talking to the story service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API error response from the story service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Successful response whose body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<RemoteError> for ServiceError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Http(err) => ServiceError::Transport(err.to_string()),
            RemoteError::Api { status, message } => ServiceError::Api { status, message },
            RemoteError::Decode(message) => ServiceError::Decode(message),
        }
    }
}
