//! Branch-path reconciliation between the local draft and a fetched
//! remote snapshot.

use crate::model::{chunk_from_snippet, Chunk, Snippet};

/// Outcome of reconciling a fetched branch path against local chunks.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileDecision {
    /// Replace the local sequence wholesale with the translated fetch.
    Adopt(Vec<Chunk>),
    /// Leave local state untouched.
    KeepLocal,
}

/// Decide whether a fetched snippet sequence should replace the local
/// chunk sequence.
///
/// Rules, in order, first match wins:
/// 1. empty fetch never erases local drafts
/// 2. empty local adopts a non-empty fetch
/// 3. identical `(id, text)` prefix and a strictly longer fetch
///    fast-forwards to the remote
/// 4. anything else keeps local (divergence means uncommitted edits)
///
/// All-or-nothing per fetch: no element-wise merge, no partial suffix
/// adoption.
pub fn reconcile_branch_path(local: &[Chunk], fetched: &[Snippet]) -> ReconcileDecision {
    if fetched.is_empty() {
        return ReconcileDecision::KeepLocal;
    }
    if local.is_empty() {
        return ReconcileDecision::Adopt(translate(fetched));
    }
    if fetched.len() > local.len() && prefix_matches(local, fetched) {
        return ReconcileDecision::Adopt(translate(fetched));
    }
    ReconcileDecision::KeepLocal
}

/// True when every local/fetched pair up to the shorter length agrees on
/// `(id, text)`.
fn prefix_matches(local: &[Chunk], fetched: &[Snippet]) -> bool {
    local
        .iter()
        .zip(fetched.iter())
        .all(|(chunk, snippet)| chunk.id == snippet.id && chunk.text == snippet.content)
}

fn translate(fetched: &[Snippet]) -> Vec<Chunk> {
    fetched.iter().map(chunk_from_snippet).collect()
}
