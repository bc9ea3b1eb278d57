use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::conversation::{Conversation, Message, MessagePage};
use super::request_registry::RequestId;
use super::thinking_trace::ThinkingState;

/// Kind of in-flight server work for a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Stream,
    Batch,
}

/// Bookkeeping record of a not-yet-finished send for one conversation.
///
/// Its existence signals "this conversation has unfinished server work in
/// flight"; switching away and back rehydrates the in-progress UI (partial
/// content plus thinking state) from this record instead of showing a blank
/// loading state.
#[derive(Debug, Clone)]
pub struct ActiveRequest {
    pub conversation_id: String,
    pub kind: RequestKind,
    pub request_id: RequestId,
    /// Content accumulated so far by the in-flight response.
    pub content: String,
    /// Last-known thinking state, deep-copied on every stream event so it
    /// can be restored verbatim.
    pub thinking: Option<ThinkingState>,
    /// Id of the in-progress assistant placeholder message, when one exists.
    pub placeholder_id: Option<String>,
}

/// Handle to the store shared across the engine. Locked only for short
/// synchronous sections, never across an await.
pub type SharedStore = Arc<Mutex<ConversationStore>>;

/// The single mutable state container: conversations, current conversation,
/// per-conversation message pages, per-conversation active-request record,
/// and the global streaming flag. Pure state, no I/O.
#[derive(Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    next_cursor: Option<String>,
    current: Option<Conversation>,
    pages: HashMap<String, MessagePage>,
    active_requests: HashMap<String, ActiveRequest>,
    /// The one conversation the UI treats as streaming. At most one
    /// globally: the UI is single-focus even though background requests for
    /// other conversations may still be in flight.
    streaming_conversation_id: Option<String>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(Mutex::new(Self::new()))
    }

    // -- conversation list ---------------------------------------------------

    /// Replace the conversation list and its pagination cursor.
    pub fn set_conversations(&mut self, conversations: Vec<Conversation>, cursor: Option<String>) {
        self.conversations = conversations;
        self.next_cursor = cursor;
    }

    /// Append one more page to the conversation list.
    pub fn append_conversations(
        &mut self,
        conversations: Vec<Conversation>,
        cursor: Option<String>,
    ) {
        self.conversations.extend(conversations);
        self.next_cursor = cursor;
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn next_cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref()
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    /// Insert a conversation, or replace the existing entry with the same id.
    /// New conversations go to the front (most recent first).
    pub fn upsert_conversation(&mut self, conversation: Conversation) {
        if let Some(existing) = self.conversations.iter_mut().find(|c| c.id == conversation.id) {
            *existing = conversation.clone();
        } else {
            self.conversations.insert(0, conversation.clone());
        }
        if self.current.as_ref().is_some_and(|c| c.id == conversation.id) {
            self.current = Some(conversation);
        }
    }

    /// Patch one conversation in place.
    ///
    /// The list entry and `current` may have diverged into separate copies,
    /// so both are patched when they denote the same id.
    pub fn update_conversation(&mut self, id: &str, patch: impl Fn(&mut Conversation)) -> bool {
        let mut found = false;
        if let Some(entry) = self.conversations.iter_mut().find(|c| c.id == id) {
            patch(entry);
            found = true;
        }
        if let Some(current) = self.current.as_mut()
            && current.id == id
        {
            patch(current);
            found = true;
        }
        found
    }

    /// Remove a conversation and its cached page. Clears `current` when the
    /// removed conversation was open.
    pub fn remove_conversation(&mut self, id: &str) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != id);
        self.pages.remove(id);
        if self.current.as_ref().is_some_and(|c| c.id == id) {
            self.current = None;
        }
        self.conversations.len() != before
    }

    // -- current conversation ------------------------------------------------

    pub fn set_current(&mut self, conversation: Option<Conversation>) {
        self.current = conversation;
    }

    pub fn current(&self) -> Option<&Conversation> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<String> {
        self.current.as_ref().map(|c| c.id.clone())
    }

    // -- message pages -------------------------------------------------------

    pub fn set_page(&mut self, conversation_id: &str, page: MessagePage) {
        self.pages.insert(conversation_id.to_string(), page);
    }

    pub fn page(&self, conversation_id: &str) -> Option<&MessagePage> {
        self.pages.get(conversation_id)
    }

    /// Append a message to a conversation's cached page, creating an empty
    /// page when none is cached yet.
    pub fn push_message(&mut self, conversation_id: &str, message: Message) {
        self.pages
            .entry(conversation_id.to_string())
            .or_default()
            .messages
            .push(message);
    }

    /// Patch a single cached message in place. Returns false when the page
    /// or message is not cached.
    pub fn update_message(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        patch: impl FnOnce(&mut Message),
    ) -> bool {
        let Some(page) = self.pages.get_mut(conversation_id) else {
            return false;
        };
        match page.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                patch(message);
                true
            }
            None => false,
        }
    }

    pub fn remove_message(&mut self, conversation_id: &str, message_id: &str) -> bool {
        let Some(page) = self.pages.get_mut(conversation_id) else {
            return false;
        };
        let before = page.messages.len();
        page.messages.retain(|m| m.id != message_id);
        page.messages.len() != before
    }

    /// Remap a temporary message id to the server-issued one.
    pub fn remap_message_id(&mut self, conversation_id: &str, old_id: &str, new_id: &str) -> bool {
        self.update_message(conversation_id, old_id, |message| {
            message.id = new_id.to_string();
        })
    }

    // -- active requests -----------------------------------------------------

    pub fn set_active_request(&mut self, request: ActiveRequest) {
        self.active_requests
            .insert(request.conversation_id.clone(), request);
    }

    pub fn active_request(&self, conversation_id: &str) -> Option<&ActiveRequest> {
        self.active_requests.get(conversation_id)
    }

    pub fn active_request_mut(&mut self, conversation_id: &str) -> Option<&mut ActiveRequest> {
        self.active_requests.get_mut(conversation_id)
    }

    pub fn remove_active_request(&mut self, conversation_id: &str) -> Option<ActiveRequest> {
        self.active_requests.remove(conversation_id)
    }

    // -- streaming flag ------------------------------------------------------

    pub fn set_streaming(&mut self, conversation_id: Option<String>) {
        self.streaming_conversation_id = conversation_id;
    }

    pub fn streaming_conversation_id(&self) -> Option<&str> {
        self.streaming_conversation_id.as_deref()
    }

    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.streaming_conversation_id.as_deref() == Some(conversation_id)
    }
}
