//! Error types for the engine core.

use thiserror::Error;

use crate::service::ServiceError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the engine core.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote service failure, surfaced per originating operation.
    #[error("remote service error: {0}")]
    Service(#[from] ServiceError),

    /// Local store I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Local store (de)serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
