//! Generation settings, experimental flags, and the outbound settings payload.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Sampling and context parameters for text generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_instruction: Option<String>,
    pub max_context_window: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            max_tokens: 512,
            model: None,
            system_prompt: None,
            base_instruction: None,
            max_context_window: 4096,
        }
    }
}

/// Partial update applied as a shallow merge; unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettingsUpdate {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub base_instruction: Option<String>,
    pub max_context_window: Option<u32>,
}

impl GenerationSettings {
    /// Shallow-merge `update` over the current value.
    pub fn apply(&mut self, update: GenerationSettingsUpdate) {
        if let Some(temperature) = update.temperature {
            self.temperature = temperature;
        }
        if let Some(max_tokens) = update.max_tokens {
            self.max_tokens = max_tokens;
        }
        if let Some(model) = update.model {
            self.model = Some(model);
        }
        if let Some(system_prompt) = update.system_prompt {
            self.system_prompt = Some(system_prompt);
        }
        if let Some(base_instruction) = update.base_instruction {
            self.base_instruction = Some(base_instruction);
        }
        if let Some(max_context_window) = update.max_context_window {
            self.max_context_window = max_context_window;
        }
    }
}

/// RPG-mode feature toggles, nested under the experimental flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpgModeSettings {
    pub enabled: bool,
    pub dice_rolls: bool,
    pub stat_tracking: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpgModeSettingsUpdate {
    pub enabled: Option<bool>,
    pub dice_rolls: Option<bool>,
    pub stat_tracking: Option<bool>,
}

impl RpgModeSettings {
    pub fn apply(&mut self, update: RpgModeSettingsUpdate) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(dice_rolls) = update.dice_rolls {
            self.dice_rolls = dice_rolls;
        }
        if let Some(stat_tracking) = update.stat_tracking {
            self.stat_tracking = stat_tracking;
        }
    }
}

/// Experimental feature flags, reset to defaults on story switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentalFlags {
    pub auto_memory: bool,
    pub lore_suggestions: bool,
    pub rpg_mode: RpgModeSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentalFlagsUpdate {
    pub auto_memory: Option<bool>,
    pub lore_suggestions: Option<bool>,
}

impl ExperimentalFlags {
    /// Shallow-merge: top-level flags only, `rpg_mode` has its own update op.
    pub fn apply(&mut self, update: ExperimentalFlagsUpdate) {
        if let Some(auto_memory) = update.auto_memory {
            self.auto_memory = auto_memory;
        }
        if let Some(lore_suggestions) = update.lore_suggestions {
            self.lore_suggestions = lore_suggestions;
        }
    }
}

/// Outbound save-story-settings payload and per-story settings fetch shape.
///
/// Gallery data is excluded; it is persisted through the local-only
/// gallery store keyed by story id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorySettingsPayload {
    pub story: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_instruction: Option<String>,
    pub max_context_window: u32,
    pub context: String,
    pub synopsis: String,
    pub memory: String,
    pub experimental: ExperimentalFlags,
}

/// Legacy global app state, used as a fallback source when per-story
/// settings are absent. Every field is optional; absent fields must not
/// overwrite local defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAppState {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_context_window: Option<u32>,
    pub context: Option<String>,
    pub synopsis: Option<String>,
    pub memory: Option<String>,
}

/// A computed write intent: the payload the persister would send for `story`.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsWrite {
    pub story: String,
    pub payload: StorySettingsPayload,
}

/// Last-fetched remote settings per story.
///
/// Invalidated after every successful save so the next read for that
/// story is re-fetched rather than served stale.
#[derive(Debug, Default)]
pub struct RemoteSettingsCache {
    inner: Mutex<HashMap<String, StorySettingsPayload>>,
}

impl RemoteSettingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, story: &str, payload: StorySettingsPayload) {
        self.inner
            .lock()
            .expect("remote settings cache poisoned")
            .insert(story.to_string(), payload);
    }

    pub fn get(&self, story: &str) -> Option<StorySettingsPayload> {
        self.inner
            .lock()
            .expect("remote settings cache poisoned")
            .get(story)
            .cloned()
    }

    pub fn invalidate(&self, story: &str) {
        self.inner
            .lock()
            .expect("remote settings cache poisoned")
            .remove(story);
    }
}
