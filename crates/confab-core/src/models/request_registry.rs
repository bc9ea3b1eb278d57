use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::conversations_store::{ActiveRequest, RequestKind, SharedStore};
use super::thinking_trace::ThinkingState;

/// Opaque id of one in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct RegistryEntry {
    conversation_id: String,
    kind: RequestKind,
    cancel_flag: Option<Arc<AtomicBool>>,
}

/// Tracks at most one in-flight request per conversation and kind.
///
/// Registry mutations are mirrored into the store's per-conversation
/// [`ActiveRequest`] record so that switching away from a conversation and
/// back can rehydrate the in-progress UI instead of showing a blank state.
#[derive(Clone)]
pub struct ActiveRequestRegistry {
    store: SharedStore,
    entries: Arc<Mutex<HashMap<RequestId, RegistryEntry>>>,
}

impl ActiveRequestRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new request. Fails when a request of the same kind is
    /// already in flight for the conversation.
    ///
    /// The returned handle ends the registration when dropped, so an error
    /// or panic mid-stream can never leave a phantom entry behind.
    pub fn begin(&self, conversation_id: &str, kind: RequestKind) -> Result<RequestHandle> {
        let request_id = {
            let mut entries = self.entries.lock();
            if entries
                .values()
                .any(|e| e.conversation_id == conversation_id && e.kind == kind)
            {
                bail!("a {kind:?} request is already in flight for conversation {conversation_id}");
            }
            let request_id = RequestId::generate();
            let cancel_flag = match kind {
                RequestKind::Stream => Some(Arc::new(AtomicBool::new(false))),
                RequestKind::Batch => None,
            };
            entries.insert(
                request_id.clone(),
                RegistryEntry {
                    conversation_id: conversation_id.to_string(),
                    kind,
                    cancel_flag,
                },
            );
            request_id
        };

        {
            let mut store = self.store.lock();
            store.set_active_request(ActiveRequest {
                conversation_id: conversation_id.to_string(),
                kind,
                request_id: request_id.clone(),
                content: String::new(),
                thinking: None,
                placeholder_id: None,
            });
            if kind == RequestKind::Stream {
                store.set_streaming(Some(conversation_id.to_string()));
            }
        }

        debug!(conv_id = %conversation_id, request_id = %request_id, ?kind, "request registered");

        let cancel_flag = self
            .entries
            .lock()
            .get(&request_id)
            .and_then(|e| e.cancel_flag.clone());

        Ok(RequestHandle {
            registry: self.clone(),
            request_id,
            conversation_id: conversation_id.to_string(),
            cancel_flag,
        })
    }

    /// Signal cancellation of the live streaming request for a conversation.
    ///
    /// Returns false when there is nothing to cancel, a normal race outcome
    /// when the stream just finished, not an error.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let entries = self.entries.lock();
        let flag = entries.values().find_map(|e| {
            if e.conversation_id == conversation_id && e.kind == RequestKind::Stream {
                e.cancel_flag.clone()
            } else {
                None
            }
        });
        match flag {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                debug!(conv_id = %conversation_id, "stream cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Remove bookkeeping for a finished request, including the store
    /// mirror and the streaming flag when they still belong to it.
    pub fn end(&self, request_id: &RequestId) {
        let Some(entry) = self.entries.lock().remove(request_id) else {
            return;
        };

        let mut store = self.store.lock();
        if store
            .active_request(&entry.conversation_id)
            .is_some_and(|r| r.request_id == *request_id)
        {
            store.remove_active_request(&entry.conversation_id);
        }
        if entry.kind == RequestKind::Stream
            && store.streaming_conversation_id() == Some(entry.conversation_id.as_str())
        {
            store.set_streaming(None);
        }
        debug!(conv_id = %entry.conversation_id, request_id = %request_id, "request ended");
    }

    /// Deep-copy the stream's progress into the store mirror so the UI can
    /// be restored verbatim after the user switches away and back.
    pub fn record_progress(&self, conversation_id: &str, content: &str, thinking: &ThinkingState) {
        let mut store = self.store.lock();
        if let Some(request) = store.active_request_mut(conversation_id) {
            request.content = content.to_string();
            request.thinking = Some(thinking.clone());
        }
    }

    /// Record which cached message is the in-progress placeholder.
    pub fn record_placeholder(&self, conversation_id: &str, message_id: &str) {
        let mut store = self.store.lock();
        if let Some(request) = store.active_request_mut(conversation_id) {
            request.placeholder_id = Some(message_id.to_string());
        }
    }

    /// Whether any request is registered for the conversation.
    pub fn has_request(&self, conversation_id: &str) -> bool {
        self.entries
            .lock()
            .values()
            .any(|e| e.conversation_id == conversation_id)
    }
}

/// Live handle for one registered request.
pub struct RequestHandle {
    registry: ActiveRequestRegistry,
    request_id: RequestId,
    conversation_id: String,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl RequestHandle {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Whether the user has asked to stop this request. Observed by the
    /// consuming loop at its next suspension point.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        self.registry.end(&self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conversations_store::ConversationStore;

    #[test]
    fn test_begin_rejects_second_request_of_same_kind() {
        let store = ConversationStore::shared();
        let registry = ActiveRequestRegistry::new(store);

        let _handle = registry.begin("c-1", RequestKind::Stream).unwrap();
        assert!(registry.begin("c-1", RequestKind::Stream).is_err());
        // A different kind or a different conversation is fine.
        assert!(registry.begin("c-1", RequestKind::Batch).is_ok());
        assert!(registry.begin("c-2", RequestKind::Stream).is_ok());
    }

    #[test]
    fn test_begin_mirrors_into_store() {
        let store = ConversationStore::shared();
        let registry = ActiveRequestRegistry::new(store.clone());

        let handle = registry.begin("c-1", RequestKind::Stream).unwrap();
        {
            let store = store.lock();
            let request = store.active_request("c-1").unwrap();
            assert_eq!(request.kind, RequestKind::Stream);
            assert_eq!(request.request_id, *handle.request_id());
            assert!(store.is_streaming("c-1"));
        }

        drop(handle);
        let store = store.lock();
        assert!(store.active_request("c-1").is_none());
        assert!(store.streaming_conversation_id().is_none());
    }

    #[test]
    fn test_cancel_signals_live_stream_only() {
        let store = ConversationStore::shared();
        let registry = ActiveRequestRegistry::new(store);

        let handle = registry.begin("c-1", RequestKind::Stream).unwrap();
        assert!(!handle.is_cancelled());
        assert!(registry.cancel("c-1"));
        assert!(handle.is_cancelled());

        drop(handle);
        // Nothing left to cancel: a normal race outcome, not an error.
        assert!(!registry.cancel("c-1"));
    }

    #[test]
    fn test_batch_requests_have_no_cancel_handle() {
        let store = ConversationStore::shared();
        let registry = ActiveRequestRegistry::new(store);

        let handle = registry.begin("c-1", RequestKind::Batch).unwrap();
        assert!(!handle.is_cancelled());
        assert!(!registry.cancel("c-1"));
    }

    #[test]
    fn test_record_progress_deep_copies_thinking_state() {
        let store = ConversationStore::shared();
        let registry = ActiveRequestRegistry::new(store.clone());
        let _handle = registry.begin("c-1", RequestKind::Stream).unwrap();

        let mut thinking = ThinkingState::default();
        thinking.note_token();
        registry.record_progress("c-1", "partial text", &thinking);

        let store = store.lock();
        let request = store.active_request("c-1").unwrap();
        assert_eq!(request.content, "partial text");
        assert!(request.thinking.is_some());
    }
}
