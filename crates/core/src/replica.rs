//! The Local Replica Store: the in-memory source of truth for the
//! narrative being composed.
//!
//! All mutations are synchronous; observers are notified through the
//! sink list after (or, for the `…WillChange` pair, before) each state
//! transition. Sinks receive the event only and must not re-enter the
//! store.

use std::sync::Arc;

use crate::model::{Chunk, HistoryAction, HistoryEntry, LoreEntry};
use crate::settings::{
    ExperimentalFlags, ExperimentalFlagsUpdate, GenerationSettings, GenerationSettingsUpdate,
    LegacyAppState, RpgModeSettingsUpdate, SettingsWrite, StorySettingsPayload,
};

/// Branch selected before the remote branch list is known.
pub const DEFAULT_BRANCH: &str = "main";

/// Change notification fired synchronously around each mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaEvent {
    /// Emitted before the reset of a story switch; carries the outgoing story.
    StoryWillChange { story: Option<String> },
    StoryChanged { story: String },
    /// Emitted before a branch switch commits; carries the current story.
    BranchWillChange { story: Option<String> },
    BranchChanged { branch: String },
    ChunksChanged,
    HistoryChanged,
    LorebookChanged,
    BranchListChanged,
    /// A persistable field changed. `intent` is `None` when no story is
    /// active; the hydration gate rides along for the persister.
    SettingsChanged {
        intent: Option<SettingsWrite>,
        hydrated: bool,
    },
    GalleryChanged {
        story: Option<String>,
        images: Vec<String>,
    },
}

/// Synchronous observer of replica mutations.
pub trait ReplicaEventSink: Send + Sync {
    fn on_event(&self, event: &ReplicaEvent);
}

/// In-memory replica of one story's working state.
pub struct ReplicaStore {
    current_story: Option<String>,
    current_branch: String,
    chunks: Vec<Chunk>,
    history: Vec<HistoryEntry>,
    branches: Vec<String>,
    lorebook: Vec<LoreEntry>,
    generation: GenerationSettings,
    experimental: ExperimentalFlags,
    context: String,
    synopsis: String,
    memory: String,
    gallery: Vec<String>,
    editing_chunk: Option<String>,
    settings_hydrated: bool,
    sinks: Vec<Arc<dyn ReplicaEventSink>>,
}

impl Default for ReplicaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaStore {
    pub fn new() -> Self {
        Self {
            current_story: None,
            current_branch: DEFAULT_BRANCH.to_string(),
            chunks: Vec::new(),
            history: Vec::new(),
            branches: Vec::new(),
            lorebook: Vec::new(),
            generation: GenerationSettings::default(),
            experimental: ExperimentalFlags::default(),
            context: String::new(),
            synopsis: String::new(),
            memory: String::new(),
            gallery: Vec::new(),
            editing_chunk: None,
            settings_hydrated: false,
            sinks: Vec::new(),
        }
    }

    /// Register an observer. Sinks fire in registration order.
    pub fn add_sink(&mut self, sink: Arc<dyn ReplicaEventSink>) {
        self.sinks.push(sink);
    }

    fn emit(&self, event: ReplicaEvent) {
        for sink in &self.sinks {
            sink.on_event(&event);
        }
    }

    fn emit_settings_changed(&self) {
        self.emit(ReplicaEvent::SettingsChanged {
            intent: self.settings_write_intent(),
            hydrated: self.settings_hydrated,
        });
    }

    // ─── accessors ──────────────────────────────────────────────────────

    pub fn current_story(&self) -> Option<&str> {
        self.current_story.as_deref()
    }

    pub fn current_branch(&self) -> &str {
        &self.current_branch
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn branches(&self) -> &[String] {
        &self.branches
    }

    pub fn lorebook(&self) -> &[LoreEntry] {
        &self.lorebook
    }

    pub fn generation_settings(&self) -> &GenerationSettings {
        &self.generation
    }

    pub fn experimental(&self) -> &ExperimentalFlags {
        &self.experimental
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn synopsis(&self) -> &str {
        &self.synopsis
    }

    pub fn memory(&self) -> &str {
        &self.memory
    }

    pub fn gallery(&self) -> &[String] {
        &self.gallery
    }

    pub fn editing_chunk(&self) -> Option<&str> {
        self.editing_chunk.as_deref()
    }

    /// True once the current story's settings have been applied from the
    /// remote service (or its legacy fallback).
    pub fn settings_hydrated(&self) -> bool {
        self.settings_hydrated
    }

    // ─── story / branch switching ───────────────────────────────────────

    /// Switch the active story. No-op when `story` is already current.
    ///
    /// Emits `StoryWillChange` (observers initiate the keepalive flush of
    /// the outgoing story's queue) before the synchronous reset, so queued
    /// commits are dispatched before local state is discarded. The reset
    /// does not wait for those requests to complete.
    pub fn set_current_story(&mut self, story: &str) -> bool {
        if self.current_story.as_deref() == Some(story) {
            return false;
        }

        self.emit(ReplicaEvent::StoryWillChange {
            story: self.current_story.clone(),
        });

        self.chunks.clear();
        self.history.clear();
        self.editing_chunk = None;
        self.experimental = ExperimentalFlags::default();
        self.settings_hydrated = false;
        self.current_story = Some(story.to_string());

        self.emit(ReplicaEvent::StoryChanged {
            story: story.to_string(),
        });
        true
    }

    /// Switch the active branch. Lighter-weight than a story switch:
    /// chunk and history state are kept.
    pub fn set_current_branch(&mut self, branch: &str) -> bool {
        if self.current_branch == branch {
            return false;
        }

        self.emit(ReplicaEvent::BranchWillChange {
            story: self.current_story.clone(),
        });

        self.current_branch = branch.to_string();
        self.emit(ReplicaEvent::BranchChanged {
            branch: branch.to_string(),
        });
        true
    }

    /// Replace the known branch list. Names are trimmed and de-duplicated,
    /// first occurrence wins, input order otherwise preserved.
    pub fn set_branches(&mut self, branches: Vec<String>) {
        let mut deduped: Vec<String> = Vec::with_capacity(branches.len());
        for name in branches {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !deduped.iter().any(|existing| existing == trimmed) {
                deduped.push(trimmed.to_string());
            }
        }
        self.branches = deduped;
        self.emit(ReplicaEvent::BranchListChanged);
    }

    // ─── chunk mutations ────────────────────────────────────────────────

    /// Replace the chunk sequence wholesale. Duplicate ids are dropped,
    /// first occurrence wins.
    pub fn set_chunks(&mut self, chunks: Vec<Chunk>) {
        let mut deduped: Vec<Chunk> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if !deduped.iter().any(|existing| existing.id == chunk.id) {
                deduped.push(chunk);
            }
        }
        self.chunks = deduped;
        self.emit(ReplicaEvent::ChunksChanged);
    }

    /// Append a chunk. An existing chunk with the same id is replaced in
    /// place instead of duplicated.
    pub fn add_chunk(&mut self, chunk: Chunk) {
        match self.chunks.iter().position(|existing| existing.id == chunk.id) {
            Some(index) => self.chunks[index] = chunk,
            None => self.chunks.push(chunk),
        }
        self.emit(ReplicaEvent::ChunksChanged);
    }

    /// Rewrite one chunk's text. Returns false when the id is unknown.
    pub fn update_chunk(&mut self, id: &str, text: impl Into<String>) -> bool {
        let Some(chunk) = self.chunks.iter_mut().find(|chunk| chunk.id == id) else {
            return false;
        };
        chunk.text = text.into();
        self.emit(ReplicaEvent::ChunksChanged);
        true
    }

    /// Delete a chunk and everything after it, recording a `Delete`
    /// history entry. Returns false when the id is unknown.
    pub fn delete_chunk(&mut self, id: &str) -> bool {
        let Some(index) = self.chunks.iter().position(|chunk| chunk.id == id) else {
            return false;
        };
        let before = self.chunks.clone();
        self.chunks.truncate(index);
        let after = self.chunks.clone();
        self.history
            .insert(0, HistoryEntry::new(HistoryAction::Delete, before, after));
        self.emit(ReplicaEvent::ChunksChanged);
        self.emit(ReplicaEvent::HistoryChanged);
        true
    }

    // ─── undo history ───────────────────────────────────────────────────

    /// Record a history entry at the head (most recent first).
    pub fn push_history(&mut self, action: HistoryAction, before: Vec<Chunk>, after: Vec<Chunk>) {
        self.history
            .insert(0, HistoryEntry::new(action, before, after));
        self.emit(ReplicaEvent::HistoryChanged);
    }

    /// Undo the most recent history entry by restoring its `before`
    /// snapshot. Empty history is a silent no-op, not an error.
    pub fn revert_from_history(&mut self) -> bool {
        if self.history.is_empty() {
            return false;
        }
        let entry = self.history.remove(0);
        self.chunks = entry.before;
        self.emit(ReplicaEvent::ChunksChanged);
        self.emit(ReplicaEvent::HistoryChanged);
        true
    }

    pub fn clear_history(&mut self) {
        if self.history.is_empty() {
            return;
        }
        self.history.clear();
        self.emit(ReplicaEvent::HistoryChanged);
    }

    // ─── lorebook ───────────────────────────────────────────────────────

    /// Lorebook is server-owned configuration: unconditional overwrite.
    pub fn set_lorebook(&mut self, entries: Vec<LoreEntry>) {
        self.lorebook = entries;
        self.emit(ReplicaEvent::LorebookChanged);
    }

    // ─── settings / context / memory ────────────────────────────────────

    pub fn update_generation_settings(&mut self, update: GenerationSettingsUpdate) {
        self.generation.apply(update);
        self.emit_settings_changed();
    }

    pub fn update_experimental(&mut self, update: ExperimentalFlagsUpdate) {
        self.experimental.apply(update);
        self.emit_settings_changed();
    }

    pub fn update_rpg_mode(&mut self, update: RpgModeSettingsUpdate) {
        self.experimental.rpg_mode.apply(update);
        self.emit_settings_changed();
    }

    pub fn set_context(&mut self, context: impl Into<String>) {
        self.context = context.into();
        self.emit_settings_changed();
    }

    pub fn set_synopsis(&mut self, synopsis: impl Into<String>) {
        self.synopsis = synopsis.into();
        self.emit_settings_changed();
    }

    pub fn set_memory(&mut self, memory: impl Into<String>) {
        self.memory = memory.into();
        self.emit_settings_changed();
    }

    pub fn set_editing_chunk(&mut self, id: Option<String>) {
        self.editing_chunk = id;
    }

    // ─── gallery (local-only channel) ───────────────────────────────────

    /// Gallery changes go to the local-only store, never the remote payload.
    pub fn set_gallery(&mut self, images: Vec<String>) {
        self.gallery = images;
        self.emit(ReplicaEvent::GalleryChanged {
            story: self.current_story.clone(),
            images: self.gallery.clone(),
        });
    }

    /// Apply a gallery list read back from the local store without echoing
    /// a write.
    pub fn hydrate_gallery(&mut self, images: Vec<String>) {
        self.gallery = images;
    }

    // ─── hydration from the remote service ─────────────────────────────

    /// Apply fetched per-story settings and open the hydration gate.
    ///
    /// Deliberately does not emit `SettingsChanged`: applying server state
    /// must not schedule a write that echoes it straight back.
    pub fn hydrate_from_payload(&mut self, payload: &StorySettingsPayload) {
        self.generation.temperature = payload.temperature;
        self.generation.max_tokens = payload.max_tokens;
        self.generation.model = payload.model.clone();
        self.generation.system_prompt = payload.system_prompt.clone();
        self.generation.base_instruction = payload.base_instruction.clone();
        self.generation.max_context_window = payload.max_context_window;
        self.context = payload.context.clone();
        self.synopsis = payload.synopsis.clone();
        self.memory = payload.memory.clone();
        self.experimental = payload.experimental;
        self.settings_hydrated = true;
    }

    /// Apply the legacy global fallback. Each field is applied only when
    /// present, so absent remote values never overwrite local defaults.
    pub fn hydrate_from_legacy(&mut self, legacy: &LegacyAppState) {
        if let Some(temperature) = legacy.temperature {
            self.generation.temperature = temperature;
        }
        if let Some(max_tokens) = legacy.max_tokens {
            self.generation.max_tokens = max_tokens;
        }
        if let Some(max_context_window) = legacy.max_context_window {
            self.generation.max_context_window = max_context_window;
        }
        if let Some(context) = &legacy.context {
            self.context = context.clone();
        }
        if let Some(synopsis) = &legacy.synopsis {
            self.synopsis = synopsis.clone();
        }
        if let Some(memory) = &legacy.memory {
            self.memory = memory.clone();
        }
        self.settings_hydrated = true;
    }

    /// The payload the persister would send right now, or `None` when no
    /// story is active.
    pub fn settings_write_intent(&self) -> Option<SettingsWrite> {
        let story = self.current_story.clone()?;
        let payload = StorySettingsPayload {
            story: story.clone(),
            temperature: self.generation.temperature,
            max_tokens: self.generation.max_tokens,
            model: self.generation.model.clone(),
            system_prompt: self.generation.system_prompt.clone(),
            base_instruction: self.generation.base_instruction.clone(),
            max_context_window: self.generation.max_context_window,
            context: self.context.clone(),
            synopsis: self.synopsis.clone(),
            memory: self.memory.clone(),
            experimental: self.experimental,
        };
        Some(SettingsWrite { story, payload })
    }
}
