//! Durable per-story commit queue for snippets.
//!
//! Decouples "the user authored a chunk" from "that chunk is committed
//! remotely": entries are registered synchronously and drained by an
//! opportunistic background task, or forced out by a flush before a
//! story/branch switch. Flush failures are swallowed; local state
//! transitions never block on network I/O.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::{debug, error, warn};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;

use crate::replica::{ReplicaEvent, ReplicaEventSink};
use crate::service::{AppendSnippetRequest, StoryService};

/// Options for a forced flush.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushOptions {
    /// Detach the flush onto the runtime so the requests can outlive the
    /// initiating context (story switch, page teardown).
    pub keepalive: bool,
}

/// Outbound queue of pending append-snippet commits.
pub struct SnippetOutbox {
    service: Arc<dyn StoryService>,
    pending: Mutex<VecDeque<AppendSnippetRequest>>,
    drain_lock: TokioMutex<()>,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl SnippetOutbox {
    pub fn new(service: Arc<dyn StoryService>) -> Self {
        Self {
            service,
            pending: Mutex::new(VecDeque::new()),
            drain_lock: TokioMutex::new(()),
            drain_task: Mutex::new(None),
        }
    }

    /// Register a pending commit and return immediately. A background
    /// drain is started if none is running; must be called from within a
    /// tokio runtime.
    pub fn enqueue(self: &Arc<Self>, request: AppendSnippetRequest) {
        debug!("[Outbox] queued snippet for {}", request.story);
        self.pending
            .lock()
            .expect("outbox queue poisoned")
            .push_back(request);
        self.ensure_drain_started();
    }

    /// Number of commits not yet handed to the remote service.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("outbox queue poisoned").len()
    }

    /// Force all pending entries out now. With `keepalive` the drain is
    /// detached and this returns at once; otherwise it completes before
    /// returning.
    pub async fn flush(self: &Arc<Self>, options: FlushOptions) {
        if options.keepalive {
            self.flush_detached();
        } else {
            self.drain(None).await;
        }
    }

    /// Detached drain of everything pending; returns at once.
    pub fn flush_detached(self: &Arc<Self>) {
        let outbox = Arc::clone(self);
        tokio::spawn(async move {
            outbox.drain(None).await;
        });
    }

    /// Detached, best-effort flush of one story's pending entries. Used
    /// by the switch sink so the outgoing story's commits survive the
    /// switch without blocking it.
    pub fn flush_story_detached(self: &Arc<Self>, story: &str) {
        let outbox = Arc::clone(self);
        let story = story.to_string();
        tokio::spawn(async move {
            outbox.drain(Some(story)).await;
        });
    }

    fn ensure_drain_started(self: &Arc<Self>) {
        let mut guard = self.drain_task.lock().expect("outbox task slot poisoned");
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
            guard.take();
        }
        let outbox = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            outbox.drain(None).await;
        }));
    }

    /// Send pending entries (optionally only one story's) in FIFO order.
    /// Failed entries are logged and dropped, never retried.
    async fn drain(&self, story: Option<String>) {
        let _serialize = self.drain_lock.lock().await;
        loop {
            let next = {
                let mut pending = self.pending.lock().expect("outbox queue poisoned");
                match &story {
                    Some(story) => {
                        let index = pending.iter().position(|entry| &entry.story == story);
                        index.and_then(|index| pending.remove(index))
                    }
                    None => pending.pop_front(),
                }
            };
            let Some(request) = next else {
                break;
            };
            let story = request.story.clone();
            match self.service.append_snippet(request).await {
                Ok(snippet) => {
                    debug!("[Outbox] committed snippet {} for {}", snippet.id, story);
                }
                Err(err) if err.is_transient() => {
                    warn!("[Outbox] dropping snippet for {}: {}", story, err);
                }
                Err(err) => {
                    error!("[Outbox] dropping snippet for {}: {}", story, err);
                }
            }
        }
    }
}

/// Replica sink that flushes the outgoing story's queue before a story
/// or branch switch commits.
pub struct OutboxSwitchSink(pub Arc<SnippetOutbox>);

impl ReplicaEventSink for OutboxSwitchSink {
    fn on_event(&self, event: &ReplicaEvent) {
        match event {
            ReplicaEvent::StoryWillChange { story: Some(story) }
            | ReplicaEvent::BranchWillChange { story: Some(story) } => {
                self.0.flush_story_detached(story);
            }
            _ => {}
        }
    }
}
