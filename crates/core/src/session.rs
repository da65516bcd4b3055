//! Session orchestration: wires the replica, outbox, persister, and
//! gallery store against one remote story service and drives the
//! fetch/reconcile cycle.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};

use crate::errors::Result;
use crate::gallery::{GallerySink, GalleryStore};
use crate::model::{Chunk, HistoryAction, SnippetKind};
use crate::outbox::{OutboxSwitchSink, SnippetOutbox};
use crate::persist::{PersisterSink, SettingsPersister, SETTINGS_DEBOUNCE_MS};
use crate::reconcile::{reconcile_branch_path, ReconcileDecision};
use crate::replica::ReplicaStore;
use crate::service::{AppendSnippetRequest, StoryService};
use crate::settings::RemoteSettingsCache;

/// Session construction parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Quiet period for the settings persister.
    pub debounce: Duration,
    /// Location of the local-only gallery file.
    pub gallery_path: PathBuf,
}

impl SessionConfig {
    pub fn new(gallery_path: impl Into<PathBuf>) -> Self {
        Self {
            debounce: Duration::from_millis(SETTINGS_DEBOUNCE_MS),
            gallery_path: gallery_path.into(),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// One user's composing session against a remote story service.
pub struct StorySession {
    replica: Mutex<ReplicaStore>,
    service: Arc<dyn StoryService>,
    outbox: Arc<SnippetOutbox>,
    persister: Arc<SettingsPersister>,
    remote_cache: Arc<RemoteSettingsCache>,
    gallery: Arc<GalleryStore>,
}

impl StorySession {
    /// Build the session and wire the replica sinks: outbox
    /// flush-on-switch, debounced persister, gallery write-through.
    pub async fn new(service: Arc<dyn StoryService>, config: SessionConfig) -> Arc<Self> {
        let remote_cache = Arc::new(RemoteSettingsCache::new());
        let outbox = Arc::new(SnippetOutbox::new(service.clone()));
        let persister = Arc::new(SettingsPersister::with_delay(
            service.clone(),
            remote_cache.clone(),
            config.debounce,
        ));
        persister.ensure_driver_started().await;
        let gallery = Arc::new(GalleryStore::new(config.gallery_path));

        let mut replica = ReplicaStore::new();
        replica.add_sink(Arc::new(OutboxSwitchSink(outbox.clone())));
        replica.add_sink(Arc::new(PersisterSink(persister.clone())));
        replica.add_sink(Arc::new(GallerySink(gallery.clone())));

        Arc::new(Self {
            replica: Mutex::new(replica),
            service,
            outbox,
            persister,
            remote_cache,
            gallery,
        })
    }

    /// Exclusive access to the replica. Mutations apply synchronously and
    /// notify the wired sinks before the guard is released.
    pub fn replica(&self) -> MutexGuard<'_, ReplicaStore> {
        self.replica.lock().expect("replica poisoned")
    }

    pub fn outbox(&self) -> &Arc<SnippetOutbox> {
        &self.outbox
    }

    pub fn remote_settings(&self) -> &Arc<RemoteSettingsCache> {
        &self.remote_cache
    }

    // ─── story lifecycle ────────────────────────────────────────────────

    /// Switch to `story` and fetch its remote state once. A repeated
    /// switch to the current story does nothing.
    pub async fn switch_story(&self, story: &str) -> Result<()> {
        if !self.replica().set_current_story(story) {
            return Ok(());
        }
        self.refresh_story(story).await
    }

    /// Switch the active branch; no re-fetch (fetches fire on story
    /// change and explicit refresh only).
    pub fn switch_branch(&self, branch: &str) -> bool {
        self.replica().set_current_branch(branch)
    }

    /// Explicit user-triggered refetch of the current story.
    pub async fn refresh(&self) -> Result<()> {
        let Some(story) = self.replica().current_story().map(str::to_string) else {
            return Ok(());
        };
        self.refresh_story(&story).await
    }

    async fn refresh_story(&self, story: &str) -> Result<()> {
        let branch = self.service.fetch_branch_path(story).await?;
        {
            let mut replica = self.replica();
            if replica.current_story() != Some(story) {
                // The user already moved on; applying would clobber the
                // new story's state.
                debug!("[Session] dropping stale branch fetch for {}", story);
                return Ok(());
            }
            if let ReconcileDecision::Adopt(chunks) =
                reconcile_branch_path(replica.chunks(), &branch.path)
            {
                replica.set_chunks(chunks);
            }
        }

        let lorebook = self.service.fetch_lorebook(story).await?;
        {
            let mut replica = self.replica();
            if replica.current_story() == Some(story) {
                replica.set_lorebook(lorebook);
            }
        }

        match self.service.fetch_story_settings(story).await? {
            Some(payload) => {
                self.remote_cache.store(story, payload.clone());
                let mut replica = self.replica();
                if replica.current_story() == Some(story) {
                    replica.hydrate_from_payload(&payload);
                }
            }
            None => {
                let legacy = self.service.fetch_legacy_app_state().await?;
                let mut replica = self.replica();
                if replica.current_story() == Some(story) {
                    replica.hydrate_from_legacy(&legacy);
                }
            }
        }

        let images = self.gallery.load(story).unwrap_or_else(|err| {
            warn!("[Session] gallery load for {} failed: {}", story, err);
            Vec::new()
        });
        {
            let mut replica = self.replica();
            if replica.current_story() == Some(story) {
                replica.hydrate_gallery(images);
            }
        }
        Ok(())
    }

    // ─── authoring ──────────────────────────────────────────────────────

    /// Append a user-authored chunk optimistically and queue its remote
    /// commit. Returns `None` when no story is active.
    pub fn append_user_chunk(&self, text: impl Into<String>) -> Option<Chunk> {
        let mut replica = self.replica();
        let story = replica.current_story()?.to_string();
        let chunk = Chunk::user(text);
        replica.add_chunk(chunk.clone());
        drop(replica);

        self.outbox.enqueue(AppendSnippetRequest {
            story,
            content: chunk.text.clone(),
            kind: SnippetKind::User,
            set_active: true,
        });
        Some(chunk)
    }

    /// Apply a completed generation. History is recorded here, not in the
    /// store, because the entry needs the post-generation sequence as
    /// `after`.
    pub fn apply_generated_chunk(&self, chunk: Chunk) {
        let mut replica = self.replica();
        let before = replica.chunks().to_vec();
        replica.add_chunk(chunk);
        let after = replica.chunks().to_vec();
        replica.push_history(HistoryAction::Generate, before, after);
    }

    /// Replace the newest chunk with a regenerated one.
    pub fn apply_regenerated_chunk(&self, chunk: Chunk) {
        let mut replica = self.replica();
        let before = replica.chunks().to_vec();
        let mut next = before.clone();
        next.pop();
        next.push(chunk);
        replica.set_chunks(next);
        let after = replica.chunks().to_vec();
        replica.push_history(HistoryAction::Regenerate, before, after);
    }

    /// Undo the most recent history entry; no-op on empty history.
    pub fn undo(&self) -> bool {
        self.replica().revert_from_history()
    }

    // ─── teardown ───────────────────────────────────────────────────────

    /// Page/process teardown: one last detached, keepalive send of any
    /// pending settings write and queued snippet commits. Never awaited,
    /// results observed only in logs.
    pub fn teardown(&self) {
        self.persister.teardown();
        self.outbox.flush_detached();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkAuthor, Snippet};
    use crate::settings::ExperimentalFlags;
    use crate::testutil::{payload_for, RecordingService};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::Ordering;

    fn snippet(id: &str, content: &str, kind: SnippetKind, at_millis: i64) -> Snippet {
        Snippet {
            id: id.to_string(),
            content: content.to_string(),
            kind,
            created_at: Utc.timestamp_millis_opt(at_millis).unwrap(),
        }
    }

    async fn session_with(
        service: Arc<RecordingService>,
        debounce_ms: u64,
    ) -> (tempfile::TempDir, Arc<StorySession>) {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = SessionConfig::new(dir.path().join("galleries.json"))
            .with_debounce(Duration::from_millis(debounce_ms));
        let session = StorySession::new(service, config).await;
        (dir, session)
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_fast_forwards_committed_prefix_with_remote_continuation() {
        let service = Arc::new(RecordingService::new());
        let (_dir, session) = session_with(service.clone(), 600).await;
        session.switch_story("story-a").await.expect("switch");

        session.replica().set_chunks(vec![Chunk {
            id: "1".to_string(),
            text: "Once upon a time".to_string(),
            author: ChunkAuthor::User,
            timestamp: 0,
        }]);
        {
            let mut branch = service.branch_path.lock().unwrap();
            branch.path = vec![
                snippet("1", "Once upon a time", SnippetKind::User, 1_000),
                snippet("2", "a hero rose.", SnippetKind::Assistant, 1_001),
            ];
        }

        session.refresh().await.expect("refresh");

        let replica = session.replica();
        let chunks = replica.chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "1");
        assert_eq!(chunks[1].id, "2");
        assert_eq!(chunks[1].text, "a hero rose.");
        assert_eq!(chunks[1].author, ChunkAuthor::Generated);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_keeps_local_divergence() {
        let service = Arc::new(RecordingService::new());
        let (_dir, session) = session_with(service.clone(), 600).await;
        session.switch_story("story-a").await.expect("switch");

        let local = vec![
            Chunk {
                id: "1".to_string(),
                text: "a".to_string(),
                author: ChunkAuthor::User,
                timestamp: 0,
            },
            Chunk {
                id: "2".to_string(),
                text: "my unsaved edit".to_string(),
                author: ChunkAuthor::User,
                timestamp: 0,
            },
        ];
        session.replica().set_chunks(local.clone());
        {
            let mut branch = service.branch_path.lock().unwrap();
            branch.path = vec![
                snippet("1", "a", SnippetKind::User, 1),
                snippet("2", "server text", SnippetKind::Assistant, 2),
                snippet("3", "more", SnippetKind::Assistant, 3),
            ];
        }

        session.refresh().await.expect("refresh");
        assert_eq!(session.replica().chunks(), local.as_slice());
    }

    #[tokio::test(start_paused = true)]
    async fn switch_story_hydrates_settings_and_populates_cache() {
        let service = Arc::new(RecordingService::new());
        let mut payload = payload_for("story-a");
        payload.temperature = 1.3;
        payload.synopsis = "from server".to_string();
        *service.story_settings.lock().unwrap() = Some(payload);

        let (_dir, session) = session_with(service.clone(), 600).await;
        session.switch_story("story-a").await.expect("switch");

        let replica = session.replica();
        assert!(replica.settings_hydrated());
        assert_eq!(replica.generation_settings().temperature, 1.3);
        assert_eq!(replica.synopsis(), "from server");
        drop(replica);
        assert!(session.remote_settings().get("story-a").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn absent_story_settings_fall_back_to_legacy_fields() {
        let service = Arc::new(RecordingService::new());
        {
            let mut legacy = service.legacy.lock().unwrap();
            legacy.temperature = Some(0.55);
            legacy.memory = Some("remembered".to_string());
        }

        let (_dir, session) = session_with(service.clone(), 600).await;
        session.switch_story("story-a").await.expect("switch");

        let replica = session.replica();
        assert!(replica.settings_hydrated());
        assert_eq!(replica.generation_settings().temperature, 0.55);
        assert_eq!(replica.memory(), "remembered");
        // Absent legacy fields keep local defaults.
        assert_eq!(replica.generation_settings().max_tokens, 512);
        assert_eq!(replica.experimental(), &ExperimentalFlags::default());
    }

    #[tokio::test(start_paused = true)]
    async fn settings_mutations_debounce_into_one_save() {
        let service = Arc::new(RecordingService::new());
        let (_dir, session) = session_with(service.clone(), 200).await;
        session.switch_story("story-a").await.expect("switch");

        session.replica().set_synopsis("one");
        session.replica().set_synopsis("two");
        session.replica().set_memory("three");
        tokio::time::sleep(Duration::from_millis(500)).await;

        let saves = service.saved_payloads();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].0.story, "story-a");
        assert_eq!(saves[0].0.synopsis, "two");
        assert_eq!(saves[0].0.memory, "three");
    }

    #[tokio::test(start_paused = true)]
    async fn switching_stories_flushes_the_outgoing_settings_immediately() {
        let service = Arc::new(RecordingService::new());
        let (_dir, session) = session_with(service.clone(), 600).await;
        session.switch_story("story-a").await.expect("switch");

        session.replica().set_synopsis("about to leave");
        session.switch_story("story-b").await.expect("switch");
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Inside the debounce window, yet the outgoing story's payload is
        // already saved.
        let saves = service.saved_payloads();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].0.story, "story-a");
        assert_eq!(saves[0].0.synopsis, "about to leave");
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_before_hydration_never_reach_the_service() {
        let service = Arc::new(RecordingService::new());
        service.fail_branch_fetch.store(true, Ordering::SeqCst);
        let (_dir, session) = session_with(service.clone(), 100).await;

        // Switch commits locally even though the fetch fails, so nothing
        // is hydrated yet.
        assert!(session.switch_story("story-a").await.is_err());
        session.replica().set_synopsis("too early");
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(service.saved_payloads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn user_chunks_commit_through_the_outbox() {
        let service = Arc::new(RecordingService::new());
        let (_dir, session) = session_with(service.clone(), 600).await;
        session.switch_story("story-a").await.expect("switch");

        let chunk = session.append_user_chunk("The gate creaked open.").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(session.replica().chunks(), &[chunk]);
        let appends = service.appended();
        assert_eq!(appends.len(), 1);
        assert_eq!(appends[0].story, "story-a");
        assert_eq!(appends[0].content, "The gate creaked open.");
        assert_eq!(appends[0].kind, SnippetKind::User);
        assert!(appends[0].set_active);
    }

    #[tokio::test(start_paused = true)]
    async fn append_without_a_story_is_refused() {
        let service = Arc::new(RecordingService::new());
        let (_dir, session) = session_with(service.clone(), 600).await;
        assert!(session.append_user_chunk("homeless text").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn generation_records_history_and_undo_restores() {
        let service = Arc::new(RecordingService::new());
        let (_dir, session) = session_with(service.clone(), 600).await;
        session.switch_story("story-a").await.expect("switch");

        let user = session.append_user_chunk("Draw your sword.").unwrap();
        session.apply_generated_chunk(Chunk {
            id: "gen-1".to_string(),
            text: "Steel rang in the dark.".to_string(),
            author: ChunkAuthor::Generated,
            timestamp: 1,
        });
        assert_eq!(session.replica().chunks().len(), 2);
        assert_eq!(
            session.replica().history()[0].action,
            HistoryAction::Generate
        );

        assert!(session.undo());
        assert_eq!(session.replica().chunks(), &[user]);
    }

    #[tokio::test(start_paused = true)]
    async fn regeneration_swaps_the_newest_chunk() {
        let service = Arc::new(RecordingService::new());
        let (_dir, session) = session_with(service.clone(), 600).await;
        session.switch_story("story-a").await.expect("switch");

        session.append_user_chunk("Draw your sword.").unwrap();
        session.apply_generated_chunk(Chunk {
            id: "gen-1".to_string(),
            text: "first take".to_string(),
            author: ChunkAuthor::Generated,
            timestamp: 1,
        });
        session.apply_regenerated_chunk(Chunk {
            id: "gen-2".to_string(),
            text: "second take".to_string(),
            author: ChunkAuthor::Generated,
            timestamp: 2,
        });

        let replica = session.replica();
        assert_eq!(replica.chunks().len(), 2);
        assert_eq!(replica.chunks()[1].id, "gen-2");
        assert_eq!(replica.history()[0].action, HistoryAction::Regenerate);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_branch_fetch_for_a_switched_away_story_is_dropped() {
        let service = Arc::new(RecordingService::new());
        {
            let mut branch = service.branch_path.lock().unwrap();
            branch.path = vec![snippet("old-1", "old story text", SnippetKind::User, 1)];
        }
        service.branch_delay_ms.store(500, Ordering::SeqCst);
        let (_dir, session) = session_with(service.clone(), 600).await;

        let slow = {
            let session = session.clone();
            tokio::spawn(async move { session.switch_story("story-old").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The user moves on while the first fetch is still in flight.
        session.replica().set_current_story("story-new");
        slow.await.expect("join").expect("switch");

        let replica = session.replica();
        assert_eq!(replica.current_story(), Some("story-new"));
        assert!(replica.chunks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn gallery_round_trips_through_the_local_store() {
        let service = Arc::new(RecordingService::new());
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("galleries.json");
        GalleryStore::new(&path)
            .save("story-a", &["castle.png".to_string()])
            .expect("seed gallery");

        let config =
            SessionConfig::new(&path).with_debounce(Duration::from_millis(600));
        let session = StorySession::new(service, config).await;
        session.switch_story("story-a").await.expect("switch");
        assert_eq!(session.replica().gallery(), ["castle.png"]);

        session
            .replica()
            .set_gallery(vec!["castle.png".to_string(), "dragon.png".to_string()]);
        assert_eq!(
            GalleryStore::new(&path).load("story-a").expect("reload"),
            vec!["castle.png".to_string(), "dragon.png".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_flushes_pending_settings_with_keepalive() {
        let service = Arc::new(RecordingService::new());
        let (_dir, session) = session_with(service.clone(), 600).await;
        session.switch_story("story-a").await.expect("switch");

        session.replica().set_synopsis("closing the tab");
        session.teardown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let saves = service.saved_payloads();
        assert_eq!(saves.len(), 1);
        assert!(saves[0].1, "teardown save is keepalive-flagged");
        assert_eq!(saves[0].0.synopsis, "closing the tab");
    }
}
