//! The remote story service seam consumed by the engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BranchPath, LoreEntry, Snippet, SnippetKind};
use crate::settings::{LegacyAppState, StorySettingsPayload};

/// Result type alias for remote service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Errors produced by a story service implementation.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// API error response from the story service.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ServiceError {
    /// Create an API error from status and message.
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

    /// Whether the failure looks transient. Nothing in the engine retries;
    /// this only decides the log level on fire-and-forget paths.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => matches!(status, 408 | 423 | 425 | 429 | 500..=599),
            Self::Decode(_) => false,
        }
    }
}

/// Request body for the append-snippet operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendSnippetRequest {
    pub story: String,
    pub content: String,
    pub kind: SnippetKind,
    pub set_active: bool,
}

/// Remote story service consumed by the engine.
///
/// `storyloom-remote` provides the HTTP implementation; tests substitute
/// recording fakes.
#[async_trait]
pub trait StoryService: Send + Sync {
    /// Ordered sequence of committed snippets for the story's active branch.
    async fn fetch_branch_path(&self, story: &str) -> ServiceResult<BranchPath>;

    async fn fetch_lorebook(&self, story: &str) -> ServiceResult<Vec<LoreEntry>>;

    /// Per-story settings, or `None` when the story has none persisted yet.
    async fn fetch_story_settings(&self, story: &str)
        -> ServiceResult<Option<StorySettingsPayload>>;

    /// Legacy global settings, used only as a fallback source.
    async fn fetch_legacy_app_state(&self) -> ServiceResult<LegacyAppState>;

    async fn append_snippet(&self, request: AppendSnippetRequest) -> ServiceResult<Snippet>;

    /// Persist the settings payload. `keepalive` marks a teardown-grade
    /// request that should complete quickly or not at all.
    async fn save_story_settings(
        &self,
        payload: StorySettingsPayload,
        keepalive: bool,
    ) -> ServiceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_classify_as_transient() {
        assert!(ServiceError::api(500, "boom").is_transient());
        assert!(ServiceError::api(429, "slow down").is_transient());
        assert!(ServiceError::Transport("connection reset".to_string()).is_transient());
    }

    #[test]
    fn client_errors_classify_as_permanent() {
        assert!(!ServiceError::api(400, "bad payload").is_transient());
        assert!(!ServiceError::api(404, "missing").is_transient());
        assert!(!ServiceError::Decode("trailing characters".to_string()).is_transient());
    }

    #[test]
    fn status_code_only_present_for_api_errors() {
        assert_eq!(ServiceError::api(409, "conflict").status_code(), Some(409));
        assert_eq!(
            ServiceError::Transport("timed out".to_string()).status_code(),
            None
        );
    }
}
