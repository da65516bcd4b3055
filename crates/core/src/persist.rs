//! Debounced settings persistence.
//!
//! Collapses bursts of local setting mutations into one outbound write
//! per quiet period, flushes immediately on story switch, and issues a
//! final detached send on teardown. All sends are fire-and-forget: a
//! failed write is logged and dropped, never retried and never surfaced.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, warn};
use tokio::sync::{Mutex as TokioMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::replica::{ReplicaEvent, ReplicaEventSink};
use crate::service::StoryService;
use crate::settings::{RemoteSettingsCache, SettingsWrite};

/// Default quiet period before an armed settings write is sent.
pub const SETTINGS_DEBOUNCE_MS: u64 = 600;

/// Debounce state: at most one armed write at a time.
#[derive(Debug)]
enum PersistState {
    Idle,
    Armed {
        write: SettingsWrite,
        deadline: Instant,
    },
}

/// Debounced writer of the story settings payload.
pub struct SettingsPersister {
    service: Arc<dyn StoryService>,
    cache: Arc<RemoteSettingsCache>,
    delay: Duration,
    state: Mutex<PersistState>,
    notify: Notify,
    driver: TokioMutex<Option<JoinHandle<()>>>,
}

impl SettingsPersister {
    pub fn new(service: Arc<dyn StoryService>, cache: Arc<RemoteSettingsCache>) -> Self {
        Self::with_delay(service, cache, Duration::from_millis(SETTINGS_DEBOUNCE_MS))
    }

    pub fn with_delay(
        service: Arc<dyn StoryService>,
        cache: Arc<RemoteSettingsCache>,
        delay: Duration,
    ) -> Self {
        Self {
            service,
            cache,
            delay,
            state: Mutex::new(PersistState::Idle),
            notify: Notify::new(),
            driver: TokioMutex::new(None),
        }
    }

    // ─── state machine transitions (timer-free, unit-testable) ──────────

    /// Arm (or re-arm) the debounce for `write`. The pending deadline is
    /// cancelled and replaced. Returns a displaced write for another
    /// story, which must be flushed immediately.
    fn arm(&self, write: SettingsWrite) -> Option<SettingsWrite> {
        let mut state = self.state.lock().expect("persister state poisoned");
        let displaced = match std::mem::replace(&mut *state, PersistState::Idle) {
            PersistState::Armed { write: old, .. } if old.story != write.story => Some(old),
            _ => None,
        };
        *state = PersistState::Armed {
            write,
            deadline: Instant::now() + self.delay,
        };
        drop(state);
        self.notify.notify_one();
        displaced
    }

    /// Take the armed write if its deadline has passed.
    fn take_due(&self, now: Instant) -> Option<SettingsWrite> {
        let mut state = self.state.lock().expect("persister state poisoned");
        let due = matches!(&*state, PersistState::Armed { deadline, .. } if *deadline <= now);
        if !due {
            return None;
        }
        match std::mem::replace(&mut *state, PersistState::Idle) {
            PersistState::Armed { write, .. } => Some(write),
            PersistState::Idle => None,
        }
    }

    /// Take the armed write regardless of its deadline.
    fn take_pending(&self) -> Option<SettingsWrite> {
        let mut state = self.state.lock().expect("persister state poisoned");
        match std::mem::replace(&mut *state, PersistState::Idle) {
            PersistState::Armed { write, .. } => Some(write),
            PersistState::Idle => None,
        }
    }

    /// Take the armed write only when it belongs to `story`.
    fn take_pending_for(&self, story: &str) -> Option<SettingsWrite> {
        let mut state = self.state.lock().expect("persister state poisoned");
        let matches_story =
            matches!(&*state, PersistState::Armed { write, .. } if write.story == story);
        if !matches_story {
            return None;
        }
        match std::mem::replace(&mut *state, PersistState::Idle) {
            PersistState::Armed { write, .. } => Some(write),
            PersistState::Idle => None,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match &*self.state.lock().expect("persister state poisoned") {
            PersistState::Armed { deadline, .. } => Some(*deadline),
            PersistState::Idle => None,
        }
    }

    // ─── scheduling API ─────────────────────────────────────────────────

    /// Record a new write intent, re-arming the debounce. A pending write
    /// for a different story is flushed immediately, independent of the
    /// new timer.
    pub fn schedule(self: &Arc<Self>, write: SettingsWrite) {
        if let Some(displaced) = self.arm(write) {
            debug!(
                "[Persister] story changed, flushing pending settings for {}",
                displaced.story
            );
            self.spawn_send(displaced, false);
        }
    }

    /// Flush any pending write for the outgoing `story` right now,
    /// detached from the debounce schedule.
    pub fn flush_for_story(self: &Arc<Self>, story: &str) {
        if let Some(write) = self.take_pending_for(story) {
            debug!("[Persister] flushing settings for outgoing story {}", story);
            self.spawn_send(write, false);
        }
    }

    /// Best-effort final send on page/process teardown. The request is
    /// detached so it may outlive the caller; the result is only logged.
    pub fn teardown(self: &Arc<Self>) {
        if let Some(write) = self.take_pending() {
            debug!("[Persister] teardown flush for {}", write.story);
            self.spawn_send(write, true);
        }
        if let Ok(mut guard) = self.driver.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }

    /// Spawn the driver task that waits out debounce deadlines. Idempotent;
    /// respawns only when a previous driver has finished.
    pub async fn ensure_driver_started(self: &Arc<Self>) {
        let mut guard = self.driver.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
            guard.take();
        }

        let persister = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            loop {
                match persister.next_deadline() {
                    Some(deadline) => {
                        tokio::select! {
                            _ = tokio::time::sleep_until(deadline) => {
                                if let Some(write) = persister.take_due(Instant::now()) {
                                    persister.send(write, false).await;
                                }
                            }
                            _ = persister.notify.notified() => {}
                        }
                    }
                    None => persister.notify.notified().await,
                }
            }
        }));
    }

    fn spawn_send(self: &Arc<Self>, write: SettingsWrite, keepalive: bool) {
        let persister = Arc::clone(self);
        tokio::spawn(async move {
            persister.send(write, keepalive).await;
        });
    }

    async fn send(&self, write: SettingsWrite, keepalive: bool) {
        let story = write.story;
        match self
            .service
            .save_story_settings(write.payload, keepalive)
            .await
        {
            Ok(()) => {
                debug!("[Persister] settings saved for {}", story);
                // The cached remote view for this story is now stale.
                self.cache.invalidate(&story);
            }
            Err(err) if err.is_transient() => {
                warn!("[Persister] settings save for {} failed: {}", story, err);
            }
            Err(err) => {
                error!("[Persister] settings save for {} failed: {}", story, err);
            }
        }
    }
}

/// Replica sink feeding the persister. Applies the no-story and
/// hydration gates before scheduling.
pub struct PersisterSink(pub Arc<SettingsPersister>);

impl ReplicaEventSink for PersisterSink {
    fn on_event(&self, event: &ReplicaEvent) {
        match event {
            ReplicaEvent::SettingsChanged {
                intent: Some(write),
                hydrated: true,
            } => self.0.schedule(write.clone()),
            ReplicaEvent::SettingsChanged { .. } => {}
            ReplicaEvent::StoryWillChange { story: Some(story) } => {
                self.0.flush_for_story(story);
            }
            _ => {}
        }
    }
}
