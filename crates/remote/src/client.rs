//! HTTP client for the remote story service.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use storyloom_core::model::{BranchPath, LoreEntry, Snippet};
use storyloom_core::service::{AppendSnippetRequest, ServiceResult, StoryService};
use storyloom_core::settings::{LegacyAppState, StorySettingsPayload};

use crate::error::{RemoteError, Result};
use crate::types::{ApiErrorResponse, SuccessResponse};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Teardown-grade saves get a short budget: finish fast or not at all.
const KEEPALIVE_TIMEOUT_SECS: u64 = 5;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Client for the story service REST API.
#[derive(Debug, Clone)]
pub struct StoryServiceClient {
    client: reqwest::Client,
    keepalive_client: reqwest::Client,
    base_url: String,
}

impl StoryServiceClient {
    /// Create a new story service client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the story API (e.g., "https://api.storyloom.app")
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");
        let keepalive_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(KEEPALIVE_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            keepalive_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            // Try to parse error response
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(RemoteError::api(
                    status.as_u16(),
                    format!("{}: {}", error.code, error.message),
                ));
            }
            return Err(RemoteError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            RemoteError::Decode(e.to_string())
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Story state
    // ─────────────────────────────────────────────────────────────────────

    /// Committed snippet sequence for the story's active branch.
    ///
    /// GET /api/v1/stories/{story}/branch-path
    pub async fn fetch_branch_path(&self, story: &str) -> Result<BranchPath> {
        let url = format!("{}/api/v1/stories/{}/branch-path", self.base_url, story);

        let response = self.client.get(&url).send().await?;
        Self::parse_response(response).await
    }

    /// Full lorebook for a story.
    ///
    /// GET /api/v1/stories/{story}/lorebook
    pub async fn fetch_lorebook(&self, story: &str) -> Result<Vec<LoreEntry>> {
        let url = format!("{}/api/v1/stories/{}/lorebook", self.base_url, story);

        let response = self.client.get(&url).send().await?;
        Self::parse_response(response).await
    }

    /// Per-story settings; `None` when the story has none persisted yet.
    ///
    /// GET /api/v1/stories/{story}/settings
    pub async fn fetch_story_settings(
        &self,
        story: &str,
    ) -> Result<Option<StorySettingsPayload>> {
        let url = format!("{}/api/v1/stories/{}/settings", self.base_url, story);

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::parse_response(response).await?))
    }

    /// Legacy global app state, fallback source only.
    ///
    /// GET /api/v1/app-state
    pub async fn fetch_legacy_app_state(&self) -> Result<LegacyAppState> {
        let url = format!("{}/api/v1/app-state", self.base_url);

        let response = self.client.get(&url).send().await?;
        Self::parse_response(response).await
    }

    /// Commit one snippet to the story's active branch.
    ///
    /// POST /api/v1/stories/{story}/snippets
    pub async fn append_snippet(&self, request: &AppendSnippetRequest) -> Result<Snippet> {
        let url = format!("{}/api/v1/stories/{}/snippets", self.base_url, request.story);
        debug!("[StoryService] appending snippet to {}", request.story);

        let response = self.client.post(&url).json(request).send().await?;
        Self::parse_response(response).await
    }

    /// Persist the settings payload. Keepalive requests use the
    /// short-timeout client.
    ///
    /// PUT /api/v1/stories/{story}/settings
    pub async fn save_story_settings(
        &self,
        payload: &StorySettingsPayload,
        keepalive: bool,
    ) -> Result<()> {
        let url = format!("{}/api/v1/stories/{}/settings", self.base_url, payload.story);
        let client = if keepalive {
            &self.keepalive_client
        } else {
            &self.client
        };

        let response = client.put(&url).json(payload).send().await?;
        let _ack: SuccessResponse = Self::parse_response(response).await?;
        Ok(())
    }
}

#[async_trait]
impl StoryService for StoryServiceClient {
    async fn fetch_branch_path(&self, story: &str) -> ServiceResult<BranchPath> {
        StoryServiceClient::fetch_branch_path(self, story)
            .await
            .map_err(Into::into)
    }

    async fn fetch_lorebook(&self, story: &str) -> ServiceResult<Vec<LoreEntry>> {
        StoryServiceClient::fetch_lorebook(self, story)
            .await
            .map_err(Into::into)
    }

    async fn fetch_story_settings(
        &self,
        story: &str,
    ) -> ServiceResult<Option<StorySettingsPayload>> {
        StoryServiceClient::fetch_story_settings(self, story)
            .await
            .map_err(Into::into)
    }

    async fn fetch_legacy_app_state(&self) -> ServiceResult<LegacyAppState> {
        StoryServiceClient::fetch_legacy_app_state(self)
            .await
            .map_err(Into::into)
    }

    async fn append_snippet(&self, request: AppendSnippetRequest) -> ServiceResult<Snippet> {
        StoryServiceClient::append_snippet(self, &request)
            .await
            .map_err(Into::into)
    }

    async fn save_story_settings(
        &self,
        payload: StorySettingsPayload,
        keepalive: bool,
    ) -> ServiceResult<()> {
        StoryServiceClient::save_story_settings(self, &payload, keepalive)
            .await
            .map_err(Into::into)
    }
}
