//! Narrative domain models shared across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a chunk of narrative text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkAuthor {
    User,
    Generated,
}

/// One chunk of the local draft sequence.
///
/// Identity is `id`; reconciliation compares `(id, text)` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub author: ChunkAuthor,
    /// Creation time in unix millis.
    pub timestamp: i64,
}

impl Chunk {
    /// Mint a fresh user-authored chunk with a local id.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            author: ChunkAuthor::User,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Role of a snippet as committed on the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetKind {
    User,
    Assistant,
    System,
}

/// Remote representation of a committed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub id: String,
    pub content: String,
    pub kind: SnippetKind,
    pub created_at: DateTime<Utc>,
}

/// Response shape of the fetch-branch-path operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchPath {
    pub path: Vec<Snippet>,
    pub text: String,
}

/// A lorebook entry, server-owned configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoreEntry {
    pub id: String,
    pub name: String,
    pub keywords: Vec<String>,
    pub content: String,
    pub enabled: bool,
}

/// Translate a committed snippet into a local chunk.
///
/// `kind == user` maps to a user-authored chunk; assistant and system
/// snippets both read back as generated text.
pub fn chunk_from_snippet(snippet: &Snippet) -> Chunk {
    Chunk {
        id: snippet.id.clone(),
        text: snippet.content.clone(),
        author: match snippet.kind {
            SnippetKind::User => ChunkAuthor::User,
            SnippetKind::Assistant | SnippetKind::System => ChunkAuthor::Generated,
        },
        timestamp: snippet.created_at.timestamp_millis(),
    }
}

/// History-tracked mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Generate,
    Regenerate,
    Delete,
    Edit,
}

/// One undo record. `before`/`after` are snapshots and are never mutated
/// after being stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub action: HistoryAction,
    pub before: Vec<Chunk>,
    pub after: Vec<Chunk>,
    pub at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(action: HistoryAction, before: Vec<Chunk>, after: Vec<Chunk>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action,
            before,
            after,
            at: Utc::now(),
        }
    }
}
