//! Recording fakes shared by the engine tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::model::{BranchPath, LoreEntry, Snippet};
use crate::service::{AppendSnippetRequest, ServiceError, ServiceResult, StoryService};
use crate::settings::{ExperimentalFlags, LegacyAppState, StorySettingsPayload};

/// In-memory `StoryService` that records every call and serves scripted
/// responses.
#[derive(Default)]
pub struct RecordingService {
    pub branch_path: Mutex<BranchPath>,
    pub lorebook: Mutex<Vec<LoreEntry>>,
    pub story_settings: Mutex<Option<StorySettingsPayload>>,
    pub legacy: Mutex<LegacyAppState>,
    pub saves: Mutex<Vec<(StorySettingsPayload, bool)>>,
    pub appends: Mutex<Vec<AppendSnippetRequest>>,
    pub fail_saves: AtomicBool,
    pub fail_appends: AtomicBool,
    pub fail_branch_fetch: AtomicBool,
    /// Artificial latency for branch-path fetches, for interleaving tests.
    pub branch_delay_ms: AtomicU64,
    append_counter: AtomicU64,
}

impl RecordingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved_payloads(&self) -> Vec<(StorySettingsPayload, bool)> {
        self.saves.lock().unwrap().clone()
    }

    pub fn appended(&self) -> Vec<AppendSnippetRequest> {
        self.appends.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoryService for RecordingService {
    async fn fetch_branch_path(&self, _story: &str) -> ServiceResult<BranchPath> {
        let delay = self.branch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        if self.fail_branch_fetch.load(Ordering::SeqCst) {
            return Err(ServiceError::api(502, "bad gateway"));
        }
        Ok(self.branch_path.lock().unwrap().clone())
    }

    async fn fetch_lorebook(&self, _story: &str) -> ServiceResult<Vec<LoreEntry>> {
        Ok(self.lorebook.lock().unwrap().clone())
    }

    async fn fetch_story_settings(
        &self,
        _story: &str,
    ) -> ServiceResult<Option<StorySettingsPayload>> {
        Ok(self.story_settings.lock().unwrap().clone())
    }

    async fn fetch_legacy_app_state(&self) -> ServiceResult<LegacyAppState> {
        Ok(self.legacy.lock().unwrap().clone())
    }

    async fn append_snippet(&self, request: AppendSnippetRequest) -> ServiceResult<Snippet> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(ServiceError::api(500, "append rejected"));
        }
        let n = self.append_counter.fetch_add(1, Ordering::SeqCst);
        let snippet = Snippet {
            id: format!("srv-{}", n),
            content: request.content.clone(),
            kind: request.kind,
            created_at: Utc::now(),
        };
        self.appends.lock().unwrap().push(request);
        Ok(snippet)
    }

    async fn save_story_settings(
        &self,
        payload: StorySettingsPayload,
        keepalive: bool,
    ) -> ServiceResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(ServiceError::api(500, "save rejected"));
        }
        self.saves.lock().unwrap().push((payload, keepalive));
        Ok(())
    }
}

/// A minimal settings payload for `story`.
pub fn payload_for(story: &str) -> StorySettingsPayload {
    StorySettingsPayload {
        story: story.to_string(),
        temperature: 0.8,
        max_tokens: 512,
        model: None,
        system_prompt: None,
        base_instruction: None,
        max_context_window: 4096,
        context: String::new(),
        synopsis: String::new(),
        memory: String::new(),
        experimental: ExperimentalFlags::default(),
    }
}
