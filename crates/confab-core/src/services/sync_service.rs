use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::models::conversation::{Conversation, is_temp_id};
use crate::models::conversations_store::SharedStore;

use super::chat_api::ChatApi;
use super::events::{SyncConversation, SyncResponse};

/// Callbacks the sync manager fires when server state diverges from local
/// state. All methods default to no-ops; implement only what the UI needs.
///
/// Called with no engine locks held, so implementations may call back into
/// the store or services freely.
pub trait SyncObserver: Send + Sync + 'static {
    /// The conversation list changed (entries added, updated or removed).
    fn on_conversations_updated(&self) {}

    /// The currently open conversation was deleted on the server.
    fn on_current_conversation_deleted(&self) {}

    /// The currently open conversation gained messages from elsewhere
    /// (another device or session). The cached page was deliberately left
    /// untouched; the observer decides when to refetch.
    fn on_current_conversation_external_update(&self, _total_messages: u64) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}

struct SyncState {
    last_sync: Option<DateTime<Utc>>,
    /// Conversations whose own stream is writing locally; sync changes for
    /// them are suppressed until the stream ends.
    streaming: HashSet<String>,
    /// Last message count the client has accounted for, per conversation.
    /// A change only fires once: the baseline advances when it does.
    baselines: HashMap<String, u64>,
    ticks_since_full: u32,
}

struct Inner {
    api: Arc<dyn ChatApi>,
    store: SharedStore,
    observer: Arc<dyn SyncObserver>,
    state: Mutex<SyncState>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
    full_sync_every: u32,
}

/// Periodically reconciles the local conversation list with the server.
///
/// Delta syncs carry per-conversation totals and timestamps; only a full
/// snapshot can reveal deletions. Changes are detected edge-triggered
/// against per-conversation baselines, so one remote change produces one
/// callback, not one per tick.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

impl SyncManager {
    pub fn new(
        api: Arc<dyn ChatApi>,
        store: SharedStore,
        observer: Arc<dyn SyncObserver>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                observer,
                state: Mutex::new(SyncState {
                    last_sync: None,
                    streaming: HashSet::new(),
                    baselines: HashMap::new(),
                    ticks_since_full: 0,
                }),
                running: AtomicBool::new(false),
                task: Mutex::new(None),
                interval: config.sync_interval(),
                full_sync_every: config.full_sync_every.max(1),
            }),
        }
    }

    /// Start the background sync loop. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(interval_secs = self.inner.interval.as_secs(), "sync loop started");
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.inner.interval);
            // The first interval tick fires immediately; skip it so startup
            // isn't counted as a sync cycle.
            ticker.tick().await;
            while this.inner.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if let Err(error) = this.tick().await {
                    // Transient failure: keep the cadence and retry next tick.
                    warn!(error = %error, "sync tick failed");
                }
            }
        });
        *self.inner.task.lock() = Some(handle);
    }

    /// Stop the background loop. Idempotent.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.inner.task.lock().take() {
            handle.abort();
        }
        info!("sync loop stopped");
    }

    /// Mark a conversation's own stream as live (or finished). While live,
    /// sync changes for it are suppressed: the stream itself is the source
    /// of truth for its content.
    pub fn set_conversation_streaming(&self, conversation_id: &str, streaming: bool) {
        let mut state = self.inner.state.lock();
        if streaming {
            state.streaming.insert(conversation_id.to_string());
        } else {
            state.streaming.remove(conversation_id);
        }
    }

    /// The user has seen the conversation at this message count; future
    /// syncs only report counts beyond it. A plain set, so re-opening a
    /// conversation resets the baseline.
    pub fn mark_conversation_read(&self, conversation_id: &str, message_count: u64) {
        self.inner
            .state
            .lock()
            .baselines
            .insert(conversation_id.to_string(), message_count);
    }

    /// Account for messages this client just created, so the next sync does
    /// not report our own send as an external change.
    pub fn increment_local_message_count(&self, conversation_id: &str, by: u64) {
        let fallback = self
            .inner
            .store
            .lock()
            .conversation(conversation_id)
            .map(|c| c.message_count)
            .unwrap_or(0);
        let mut state = self.inner.state.lock();
        let baseline = state
            .baselines
            .entry(conversation_id.to_string())
            .or_insert(fallback);
        *baseline += by;
    }

    /// Run one sync cycle now. Every `full_sync_every`-th cycle requests a
    /// full snapshot instead of a delta.
    pub async fn tick(&self) -> Result<()> {
        let full = {
            let mut state = self.inner.state.lock();
            state.ticks_since_full += 1;
            if state.ticks_since_full >= self.inner.full_sync_every {
                state.ticks_since_full = 0;
                true
            } else {
                false
            }
        };
        self.sync_once(full).await
    }

    /// Force a full snapshot sync now and reset the delta cadence.
    pub async fn full_sync(&self) -> Result<()> {
        self.inner.state.lock().ticks_since_full = 0;
        self.sync_once(true).await
    }

    async fn sync_once(&self, full: bool) -> Result<()> {
        let since = self.inner.state.lock().last_sync;
        let response = self.inner.api.sync(since, full).await?;
        debug!(
            full,
            conversations = response.conversations.len(),
            "sync response received"
        );
        self.apply(response);
        Ok(())
    }

    /// Fold a sync response into local state.
    ///
    /// Three phases, each under its own lock: plan against the baselines,
    /// mutate the store, then fire observer callbacks with no locks held.
    fn apply(&self, response: SyncResponse) {
        let (current_id, known_counts) = {
            let store = self.inner.store.lock();
            let counts: HashMap<String, u64> = store
                .conversations()
                .iter()
                .map(|c| (c.id.clone(), c.message_count))
                .collect();
            (store.current_id(), counts)
        };

        let mut additions: Vec<Conversation> = Vec::new();
        let mut updates: Vec<SyncConversation> = Vec::new();
        let mut deletions: Vec<String> = Vec::new();
        let mut current_deleted = false;
        let mut external_update: Option<u64> = None;

        {
            let mut state = self.inner.state.lock();
            state.last_sync = Some(response.server_time);

            for remote in &response.conversations {
                if is_temp_id(&remote.id) || state.streaming.contains(&remote.id) {
                    continue;
                }
                let Some(&local_count) = known_counts.get(&remote.id) else {
                    additions.push(remote.to_conversation());
                    state
                        .baselines
                        .insert(remote.id.clone(), remote.message_count);
                    continue;
                };
                // Unknown baseline means this conversation predates the sync
                // manager's bookkeeping; what the store shows is accounted for.
                let baseline = state
                    .baselines
                    .get(&remote.id)
                    .copied()
                    .unwrap_or(local_count);
                if remote.message_count <= baseline {
                    continue;
                }
                state
                    .baselines
                    .insert(remote.id.clone(), remote.message_count);
                if current_id.as_deref() == Some(remote.id.as_str()) {
                    external_update = Some(remote.message_count);
                } else {
                    updates.push(remote.clone());
                }
            }

            if response.full {
                let present: HashSet<&str> =
                    response.conversations.iter().map(|c| c.id.as_str()).collect();
                for id in known_counts.keys() {
                    if present.contains(id.as_str())
                        || is_temp_id(id)
                        || state.streaming.contains(id)
                    {
                        continue;
                    }
                    if current_id.as_deref() == Some(id.as_str()) {
                        current_deleted = true;
                    }
                    state.baselines.remove(id);
                    deletions.push(id.clone());
                }
            }
        }

        let list_changed = !additions.is_empty() || !updates.is_empty() || !deletions.is_empty();

        if list_changed {
            let mut store = self.inner.store.lock();
            for conversation in additions {
                store.upsert_conversation(conversation);
            }
            for remote in &updates {
                store.update_conversation(&remote.id, |c| {
                    c.title = remote.title.clone();
                    c.model = remote.model.clone();
                    c.message_count = remote.message_count;
                    c.updated_at = remote.updated_at;
                });
            }
            for id in &deletions {
                store.remove_conversation(id);
            }
        }

        if list_changed {
            self.inner.observer.on_conversations_updated();
        }
        if current_deleted {
            self.inner.observer.on_current_conversation_deleted();
        }
        if let Some(total) = external_update {
            self.inner.observer.on_current_conversation_external_update(total);
        }
    }
}
